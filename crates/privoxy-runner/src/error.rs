use std::fmt;

// Exit status used for every setup/configuration failure.
pub const SETUP_FAILURE_CODE: u8 = 1;

#[derive(Debug)]
pub struct Error {
    msg: String,
    code: u8,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self {
            msg: msg.into(),
            code: SETUP_FAILURE_CODE,
        }
    }

    /// The analyzer exited unsuccessfully; the wrapper reports the job's own code.
    /// `None` (killed by a signal) and out-of-range codes collapse to 1.
    pub fn job_failed(code: Option<i32>) -> Self {
        let exit = code
            .and_then(|c| u8::try_from(c).ok())
            .filter(|c| *c != 0)
            .unwrap_or(SETUP_FAILURE_CODE);
        let msg = match code {
            Some(c) => format!("analyzer exited with status {c}"),
            None => "analyzer terminated by signal".to_string(),
        };
        Self { msg, code: exit }
    }

    pub fn exit_code(&self) -> u8 {
        self.code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
