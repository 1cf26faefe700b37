// Analyzer output is appended to a plain-text log that operators read with
// `less`/`tail`; colour codes and cursor movement must not survive.
const MAX_LINE_CHARS: usize = 8192;

#[derive(Clone, Copy)]
enum Escape {
    Start,
    Csi,
    // OSC, DCS, SOS, PM and APC all run until ST (ESC \); OSC may also end at BEL.
    String { bel_ends: bool },
    StringEsc { bel_ends: bool },
}

pub fn clean_output_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut escape: Option<Escape> = None;
    let mut kept = 0usize;

    for c in input.chars() {
        if let Some(state) = escape {
            escape = match (state, c) {
                (Escape::Start, '[') => Some(Escape::Csi),
                (Escape::Start, ']') => Some(Escape::String { bel_ends: true }),
                (Escape::Start, 'P' | 'X' | '^' | '_') => Some(Escape::String { bel_ends: false }),
                (Escape::Start, _) => None,
                (Escape::Csi, c) if ('@'..='~').contains(&c) => None,
                (Escape::Csi, _) => Some(Escape::Csi),
                (Escape::String { bel_ends: true }, '\x07') => None,
                (Escape::String { bel_ends }, '\x1b') => Some(Escape::StringEsc { bel_ends }),
                (Escape::String { bel_ends }, _) => Some(Escape::String { bel_ends }),
                (Escape::StringEsc { .. }, '\\') => None,
                (Escape::StringEsc { bel_ends }, '\x1b') => Some(Escape::StringEsc { bel_ends }),
                (Escape::StringEsc { bel_ends }, _) => Some(Escape::String { bel_ends }),
            };
            continue;
        }

        match c {
            '\x1b' => {
                escape = Some(Escape::Start);
                continue;
            }
            c if c != '\t' && (c.is_control() || is_bidi_control(c)) => continue,
            _ if kept == MAX_LINE_CHARS => {
                out.push_str(" ...[truncated]");
                break;
            }
            c => {
                out.push(c);
                kept += 1;
            }
        }
    }

    out.trim_end().to_string()
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
