//! The batch parameter-file loader.
//!
//! A whole rip job can be described by a small line-oriented text file,
//! which makes unattended batch runs possible.  Blank lines and lines
//! starting with `#` are skipped; every other line must satisfy the
//! current phase of a fixed six-phase grammar:
//!
//! ```text
//! # input IFO, output path, program chain
//! /dvd/VTS_01_0.IFO
//! /tmp/movie
//! 1
//! # angle, optionally followed by an explicit cell selection
//! 1 v1 c1 v1 c2
//! # language selection: ALL, stream indices, 2-letter codes, or cc
//! en cc
//! # trailing options, one per line
//! RESETTIME
//! FORCEDONLY
//! ```
//!
//! Any line that does not fit its phase aborts the whole load, and the
//! file must at least reach the language selection.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::RipError;
use crate::lang;
use crate::rip::RipperConfig;
use crate::Result;

lazy_static! {
    static ref VOB_TOKEN: Regex = Regex::new(r"^[vV](\d{1,5})$").unwrap();
    static ref CELL_TOKEN: Regex = Regex::new(r"^[cC](\d{1,3})$").unwrap();
    static ref INDEX_TOKEN: Regex = Regex::new(r"^\d{1,2}$").unwrap();
    static ref CODE_TOKEN: Regex = Regex::new(r"^[A-Za-z]{2}$").unwrap();
}

/// Which subpicture streams a parameter file selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LangSelection {
    /// Every stream the program chain carries.
    All,
    /// An explicit token list.
    Tokens(Vec<LangToken>),
}

/// One language-selection token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LangToken {
    /// A stream index 0-31.
    Stream(usize),
    /// A packed 2-letter language id.
    Code(u16),
    /// Closed captions, decoded from the video stream.
    ClosedCaption,
}

/// A parsed parameter file.  Stream selections are still symbolic at
/// this point; `to_config` resolves them against a program chain's
/// language table.
#[derive(Clone, Debug)]
pub struct ParamFile {
    /// The `VTS_xx_0.IFO` of the title set to rip.
    pub input: PathBuf,
    /// Where the caller wants the results written.
    pub output: PathBuf,
    /// 1-based program chain number.
    pub pgc: usize,
    /// 1-based angle number.
    pub angle: usize,
    /// Explicit `(vob << 16 | cell)` selection; empty selects the whole
    /// angle.
    pub vcs: Vec<u32>,
    /// The language selection.
    pub langs: LangSelection,
    /// `CLOSE`: close the hosting UI when the job ends.
    pub close_when_done: bool,
    /// `BEEP`: ring the bell when the job ends.
    pub beep: bool,
    /// `RESETTIME`: rebase start times onto the first packet.
    pub reset_time: bool,
    /// `FORCEDONLY`: keep only forced subtitles.
    pub forced_only: bool,
    /// `CLOSEIGNOREERRORS`: close even after a failure.
    pub close_ignore_errors: bool,
}

enum Phase {
    Input,
    Output,
    Pgc,
    Angle,
    Langs,
    Options,
}

fn bad_line(line: usize, message: String) -> RipError {
    RipError::ParamFile { line, message }
}

impl ParamFile {
    /// Parse the text of a parameter file.
    pub fn parse(text: &str) -> Result<ParamFile> {
        let mut phase = Phase::Input;
        let mut params = ParamFile {
            input: PathBuf::new(),
            output: PathBuf::new(),
            pgc: 0,
            angle: 1,
            vcs: vec![],
            langs: LangSelection::All,
            close_when_done: false,
            beep: false,
            reset_time: false,
            forced_only: false,
            close_ignore_errors: false,
        };

        for (number, raw) in text.lines().enumerate() {
            let number = number + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match phase {
                Phase::Input => {
                    params.input = PathBuf::from(line);
                    phase = Phase::Output;
                }
                Phase::Output => {
                    params.output = PathBuf::from(line);
                    phase = Phase::Pgc;
                }
                Phase::Pgc => {
                    params.pgc = line.parse().map_err(|_| {
                        bad_line(number, format!("expected a PGC number, got {:?}", line))
                    })?;
                    if params.pgc == 0 {
                        return Err(bad_line(number, "PGC numbers start at 1".to_string())
                            .into());
                    }
                    phase = Phase::Angle;
                }
                Phase::Angle => {
                    parse_angle_line(line, number, &mut params)?;
                    phase = Phase::Langs;
                }
                Phase::Langs => {
                    params.langs = parse_langs_line(line, number)?;
                    phase = Phase::Options;
                }
                Phase::Options => match line.to_ascii_uppercase().as_str() {
                    "CLOSE" => params.close_when_done = true,
                    "BEEP" => params.beep = true,
                    "RESETTIME" => params.reset_time = true,
                    "FORCEDONLY" => params.forced_only = true,
                    "CLOSEIGNOREERRORS" => params.close_ignore_errors = true,
                    other => {
                        return Err(bad_line(
                            number,
                            format!("unknown option {:?}", other),
                        )
                        .into())
                    }
                },
            }
        }

        if !matches!(phase, Phase::Options) {
            return Err(bad_line(
                text.lines().count(),
                "the file ended before the language selection".to_string(),
            )
            .into());
        }
        Ok(params)
    }

    /// Resolve the symbolic stream selection against a program chain's
    /// language table and build a `RipperConfig`.
    pub fn to_config(&self, lang_ids: &[u16; 32]) -> Result<RipperConfig> {
        let mut config = RipperConfig {
            pgc: self.pgc,
            angle: self.angle,
            vcs: self.vcs.clone(),
            close_when_done: self.close_when_done,
            beep: self.beep,
            reset_time: self.reset_time,
            forced_only: self.forced_only,
            close_ignore_errors: self.close_ignore_errors,
            ..RipperConfig::default()
        };
        match &self.langs {
            LangSelection::All => {
                for (i, &id) in lang_ids.iter().enumerate() {
                    config.stream_ids[i] = id != 0;
                }
            }
            LangSelection::Tokens(tokens) => {
                for &token in tokens {
                    match token {
                        LangToken::Stream(i) => config.stream_ids[i] = true,
                        LangToken::Code(code) => {
                            let mut any = false;
                            for (i, &id) in lang_ids.iter().enumerate() {
                                if id == code {
                                    config.stream_ids[i] = true;
                                    any = true;
                                }
                            }
                            if !any {
                                return Err(RipError::Config(format!(
                                    "the title has no {:?} subtitle stream",
                                    lang::lang_code(code)
                                ))
                                .into());
                            }
                        }
                        LangToken::ClosedCaption => config.closed_caption = true,
                    }
                }
            }
        }
        Ok(config)
    }
}

/// The angle line: an angle number, optionally followed by `v<N>` /
/// `c<M>` tokens naming the cells to rip.
fn parse_angle_line(line: &str, number: usize, params: &mut ParamFile) -> Result<()> {
    let mut tokens = line.split_whitespace();
    let angle = tokens.next().unwrap_or("");
    params.angle = angle.parse().map_err(|_| {
        bad_line(number, format!("expected an angle number, got {:?}", angle))
    })?;

    let mut vob: Option<u32> = None;
    for token in tokens {
        if let Some(caps) = VOB_TOKEN.captures(token) {
            let id: u16 = caps[1].parse().map_err(|_| {
                bad_line(number, format!("vob id out of range in {:?}", token))
            })?;
            vob = Some(u32::from(id));
        } else if let Some(caps) = CELL_TOKEN.captures(token) {
            let cell: u8 = caps[1].parse().map_err(|_| {
                bad_line(number, format!("cell id out of range in {:?}", token))
            })?;
            let vob = vob.ok_or_else(|| {
                bad_line(number, format!("{:?} appears before any vob token", token))
            })?;
            params.vcs.push(vob << 16 | u32::from(cell));
        } else {
            return Err(bad_line(
                number,
                format!("expected a v<N> or c<M> token, got {:?}", token),
            )
            .into());
        }
    }
    Ok(())
}

/// The language line: `ALL`, or stream indices, 2-letter codes and `cc`
/// separated by whitespace.
fn parse_langs_line(line: &str, number: usize) -> Result<LangSelection> {
    if line.eq_ignore_ascii_case("all") {
        return Ok(LangSelection::All);
    }
    let mut tokens = vec![];
    for token in line.split_whitespace() {
        if token.eq_ignore_ascii_case("cc") {
            tokens.push(LangToken::ClosedCaption);
        } else if INDEX_TOKEN.is_match(token) {
            let i: usize = token.parse().map_err(|_| {
                bad_line(number, format!("bad stream index {:?}", token))
            })?;
            if i > 31 {
                return Err(
                    bad_line(number, format!("stream index {} is out of range 0-31", i))
                        .into(),
                );
            }
            tokens.push(LangToken::Stream(i));
        } else if CODE_TOKEN.is_match(token) {
            let id = lang::lang_id(&token.to_ascii_lowercase()).ok_or_else(|| {
                bad_line(number, format!("unknown language code {:?}", token))
            })?;
            tokens.push(LangToken::Code(id));
        } else {
            return Err(bad_line(
                number,
                format!("expected a language selection, got {:?}", token),
            )
            .into());
        }
    }
    if tokens.is_empty() {
        return Err(bad_line(number, "empty language selection".to_string()).into());
    }
    Ok(LangSelection::Tokens(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_error(err: crate::Error) -> (usize, String) {
        match err.downcast_ref::<RipError>() {
            Some(RipError::ParamFile { line, message }) => (*line, message.clone()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn parses_a_full_file() {
        let text = "\
# a comment
/dvd/VTS_01_0.IFO
/tmp/movie

1
1 v1 c1 v1 c2
en 3 cc
RESETTIME
FORCEDONLY
";
        let params = ParamFile::parse(text).unwrap();
        assert_eq!(params.input, PathBuf::from("/dvd/VTS_01_0.IFO"));
        assert_eq!(params.output, PathBuf::from("/tmp/movie"));
        assert_eq!(params.pgc, 1);
        assert_eq!(params.angle, 1);
        assert_eq!(params.vcs, vec![1 << 16 | 1, 1 << 16 | 2]);
        assert_eq!(
            params.langs,
            LangSelection::Tokens(vec![
                LangToken::Code(0x656e),
                LangToken::Stream(3),
                LangToken::ClosedCaption,
            ])
        );
        assert!(params.reset_time);
        assert!(params.forced_only);
        assert!(!params.close_when_done);
    }

    #[test]
    fn accepts_all_and_no_options() {
        let text = "in.ifo\nout\n2\n1\nALL\n";
        let params = ParamFile::parse(text).unwrap();
        assert_eq!(params.pgc, 2);
        assert_eq!(params.langs, LangSelection::All);
        assert!(params.vcs.is_empty());
    }

    #[test]
    fn rejects_a_bad_pgc_number() {
        let err = ParamFile::parse("in.ifo\nout\nfirst\n1\nALL\n").unwrap_err();
        let (line, message) = param_error(err);
        assert_eq!(line, 3);
        assert!(message.contains("PGC"));
    }

    #[test]
    fn rejects_a_cell_token_before_any_vob() {
        let err = ParamFile::parse("in.ifo\nout\n1\n1 c1 v1\nALL\n").unwrap_err();
        let (line, _) = param_error(err);
        assert_eq!(line, 4);
    }

    #[test]
    fn rejects_an_unknown_language_code() {
        let err = ParamFile::parse("in.ifo\nout\n1\n1\nqx\n").unwrap_err();
        let (_, message) = param_error(err);
        assert!(message.contains("qx"));
    }

    #[test]
    fn rejects_an_unknown_option() {
        let err = ParamFile::parse("in.ifo\nout\n1\n1\nALL\nLOUDER\n").unwrap_err();
        let (line, _) = param_error(err);
        assert_eq!(line, 6);
    }

    #[test]
    fn rejects_a_file_ending_too_early() {
        let err = ParamFile::parse("in.ifo\nout\n1\n1\n").unwrap_err();
        let (_, message) = param_error(err);
        assert!(message.contains("ended"));
    }

    #[test]
    fn resolves_streams_against_the_language_table() {
        let mut lang_ids = [0u16; 32];
        lang_ids[0] = 0x656e; // en
        lang_ids[1] = 0x6672; // fr
        lang_ids[2] = 0x656e; // a second English stream

        let params =
            ParamFile::parse("in.ifo\nout\n1\n1\nen cc\nBEEP\n").unwrap();
        let config = params.to_config(&lang_ids).unwrap();
        assert!(config.stream_ids[0]);
        assert!(!config.stream_ids[1]);
        assert!(config.stream_ids[2]);
        assert!(config.closed_caption);
        assert!(config.beep);

        let params = ParamFile::parse("in.ifo\nout\n1\n1\nALL\n").unwrap();
        let config = params.to_config(&lang_ids).unwrap();
        assert!(config.stream_ids[0] && config.stream_ids[1] && config.stream_ids[2]);
        assert!(!config.stream_ids[3]);

        let params = ParamFile::parse("in.ifo\nout\n1\n1\nde\n").unwrap();
        assert!(params.to_config(&lang_ids).is_err());
    }
}
