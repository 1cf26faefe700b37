use std::cell::RefCell;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use privoxy_runner::process::{CommandRunner, CommandSpec, CommandStatus, SystemRunner};
use privoxy_runner::schedule::{InstallState, InstallTarget, Installer, install_entry};

/// In-memory crontab: `-l` prints the table, `-` replaces it from stdin.
#[derive(Default)]
struct FakeCrontab {
    table: RefCell<Option<String>>,
    fail_writes: bool,
    writes: RefCell<usize>,
}

impl CommandRunner for FakeCrontab {
    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> privoxy_runner::Result<CommandStatus> {
        assert_eq!(cmd.program, PathBuf::from("crontab"));
        match cmd.args.first().map(String::as_str) {
            Some("-l") => match self.table.borrow().as_ref() {
                Some(t) => {
                    for line in t.lines() {
                        on_line(line);
                    }
                    Ok(CommandStatus { code: Some(0) })
                }
                None => {
                    on_line("no crontab for tester");
                    Ok(CommandStatus { code: Some(1) })
                }
            },
            Some("-") => {
                *self.writes.borrow_mut() += 1;
                if self.fail_writes {
                    on_line("crontab: permission denied");
                    return Ok(CommandStatus { code: Some(1) });
                }
                *self.table.borrow_mut() = cmd.stdin.clone();
                Ok(CommandStatus { code: Some(0) })
            }
            other => panic!("unexpected crontab args {other:?}"),
        }
    }
}

struct Setup {
    _tmp: tempfile::TempDir,
    target: InstallTarget,
}

fn setup(with_ssh_key: bool) -> Setup {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("privoxy");
    let home = tmp.path().join("home");
    fs::create_dir_all(&dir).expect("mkdir dir");
    fs::create_dir_all(home.join(".ssh")).expect("mkdir ssh");
    if with_ssh_key {
        fs::write(home.join(".ssh/id_ed25519"), "key").expect("write key");
    }
    let wrapper = dir.join("privoxy-run");
    fs::write(&wrapper, "").expect("write wrapper");
    Setup {
        target: InstallTarget::new(dir, wrapper, Some(home)),
        _tmp: tmp,
    }
}

fn drive(target: &InstallTarget, runner: &FakeCrontab, answers: &str) -> (InstallState, String) {
    let mut out = Vec::new();
    let state = {
        let mut installer = Installer::new(
            Cursor::new(answers.as_bytes().to_vec()),
            &mut out,
            target.clone(),
            runner,
        );
        installer.run().expect("installer")
    };
    (state, String::from_utf8_lossy(&out).into_owned())
}

#[test]
fn hourly_without_ssh_user_installs_plain_entry() {
    let s = setup(true);
    let crontab = FakeCrontab::default();

    let (state, _) = drive(&s.target, &crontab, "2\n\ny\n");
    let InstallState::Installed { entry } = state else {
        panic!("expected install, got {state:?}");
    };
    assert!(entry.starts_with("0 * * * * cd '"));
    assert!(!entry.contains("UPLOAD_USER"));
    assert!(entry.ends_with(">/dev/null 2>&1"));

    let table = crontab.table.borrow().clone().expect("table written");
    assert_eq!(table, format!("{entry}\n"));
}

#[test]
fn reinstalling_keeps_a_single_entry_for_the_wrapper() {
    let s = setup(true);
    let crontab = FakeCrontab::default();
    *crontab.table.borrow_mut() = Some("MAILTO=ops\n15 3 * * * /usr/local/bin/backup\n".into());

    drive(&s.target, &crontab, "1\nwww\ny\n");
    let (state, _) = drive(&s.target, &crontab, "4\n\nyes\n");
    assert!(matches!(state, InstallState::Installed { .. }));

    let table = crontab.table.borrow().clone().expect("table");
    let wrapper = s.target.wrapper.display().to_string();
    let matching: Vec<&str> = table.lines().filter(|l| l.contains(&wrapper)).collect();
    assert_eq!(matching.len(), 1, "table:\n{table}");
    assert!(matching[0].starts_with("0 6 * * * "));
    assert!(table.contains("MAILTO=ops"));
    assert!(table.contains("/usr/local/bin/backup"));
}

#[test]
fn upload_user_is_inlined_and_missing_key_warns() {
    let s = setup(false);
    let crontab = FakeCrontab::default();

    let (state, out) = drive(&s.target, &crontab, "1\nwww\ny\n");
    let InstallState::Installed { entry } = state else {
        panic!("expected install, got {state:?}");
    };
    assert!(entry.starts_with("*/30 * * * * cd '"));
    assert!(entry.contains(" && UPLOAD_USER='www' '"));
    assert!(out.contains("no SSH key found"));
}

#[test]
fn custom_expression_is_accepted() {
    let s = setup(true);
    let crontab = FakeCrontab::default();

    let (state, _) = drive(&s.target, &crontab, "6\n5 */3 * * 1-5\n\ny\n");
    let InstallState::Installed { entry } = state else {
        panic!("expected install, got {state:?}");
    };
    assert!(entry.starts_with("5 */3 * * 1-5 cd '"));
}

#[test]
fn declined_or_invalid_choices_leave_table_untouched() {
    let s = setup(true);
    for answers in ["9\n", "6\nnot a cron\n", "2\n\nn\n", "2\n\n", ""] {
        let crontab = FakeCrontab::default();
        let (state, _) = drive(&s.target, &crontab, answers);
        assert!(
            matches!(state, InstallState::Aborted { .. }),
            "answers {answers:?} gave {state:?}"
        );
        assert_eq!(*crontab.writes.borrow(), 0);
        assert!(crontab.table.borrow().is_none());
    }
}

#[test]
fn failed_crontab_write_is_an_error() {
    let s = setup(true);
    let crontab = FakeCrontab {
        fail_writes: true,
        ..FakeCrontab::default()
    };
    let mut out = Vec::new();
    let mut installer = Installer::new(
        Cursor::new(b"2\n\ny\n".to_vec()),
        &mut out,
        s.target.clone(),
        &crontab,
    );
    let err = installer.run().expect_err("write fails");
    assert!(err.to_string().contains("crontab install failed"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn missing_wrapper_fails_validation() {
    let s = setup(true);
    fs::remove_file(&s.target.wrapper).expect("rm wrapper");
    let err = s.target.validate().expect_err("wrapper missing");
    assert!(err.to_string().contains("run wrapper not found"));
    assert_eq!(err.exit_code(), 1);
}

// `-l` prints a table with a blank line, trailing spaces and a stale entry,
// plus a warning on stderr; `-` stores stdin next to the script.
#[cfg(unix)]
const CRONTAB_SCRIPT: &str = r##"#!/bin/sh
case "$1" in
-l)
cat <<'EOF'
MAILTO=ops

# nightly backup   
0 1 * * * /usr/bin/backup
*/30 * * * * cd '/opt/p' && '/opt/p/privoxy-run' >/dev/null 2>&1
EOF
echo 'crontab: warning: deprecated option' >&2
;;
-) cat > "$0.written" ;;
*) exit 2 ;;
esac
"##;

#[cfg(unix)]
#[test]
fn real_crontab_round_trip_keeps_foreign_lines_intact() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().expect("tempdir");
    let script = tmp.path().join("crontab");
    fs::write(&script, CRONTAB_SCRIPT).expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

    let wrapper = PathBuf::from("/opt/p/privoxy-run");
    let entry = "0 * * * * cd '/opt/p' && '/opt/p/privoxy-run' >/dev/null 2>&1";
    install_entry(&SystemRunner, &script, &wrapper, entry).expect("install");

    let written = fs::read_to_string(tmp.path().join("crontab.written")).expect("written table");
    assert_eq!(
        written,
        format!("MAILTO=ops\n\n# nightly backup   \n0 1 * * * /usr/bin/backup\n{entry}\n")
    );
}
