use std::path::PathBuf;
use std::str::FromStr;

/// Order in which candidate passwords are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shortest lengths first.
    Ascending,
    /// Longest lengths first.
    Descending,
    /// A uniform shuffle of the whole candidate space.
    Random,
}

impl FromStr for Mode {
    type Err = String;

    /// Case-insensitive; an unrecognized spelling is a configuration error
    /// reported on the status channel, not a usage error.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.to_ascii_lowercase().as_str() {
            "ascending" => Ok(Mode::Ascending),
            "descending" => Ok(Mode::Descending),
            "random" => Ok(Mode::Random),
            _ => Err(format!(
                "invalid mode `{text}`, expected ascending, descending, or random"
            )),
        }
    }
}

/// Everything the engine needs to run. Built once at launch, read-only after.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered characters admissible in wildcard positions; the order defines
    /// digit significance in the index arithmetic.
    pub charset: Vec<char>,
    pub min_length: usize,
    pub max_length: usize,
    pub archive: PathBuf,
    pub mode: Mode,
    /// Optional structural template constraining candidate shape.
    pub pattern: Option<String>,
    /// Path of the persisted skip list; also the anchor for the stop flag.
    pub skip_file: Option<PathBuf>,
    /// Seconds between mid-run skip-list saves; 0 disables checkpointing.
    pub checkpoint_interval: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_spellings_are_case_insensitive() {
        assert_eq!("ascending".parse(), Ok(Mode::Ascending));
        assert_eq!("DESCENDING".parse(), Ok(Mode::Descending));
        assert_eq!("RanDom".parse(), Ok(Mode::Random));
    }

    #[test]
    fn unknown_mode_spelling_echoes_the_input() {
        let err = "descneding".parse::<Mode>().unwrap_err();
        assert!(err.contains("descneding"));
    }
}
