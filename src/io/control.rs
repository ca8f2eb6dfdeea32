// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-file parsing.
//!
//! One `key = value` option per line; blank lines and lines starting
//! with `#` or `*` are comments. Recognized options:
//!
//! | Option | Effect |
//! |--------|--------|
//! | `useGPU = {0,1}` | Try GPU backends in availability order, else CPU |
//! | `requireGPU = {0,1}` | Fail (exit 3) instead of falling back to CPU |
//! | `nthreads = N` | CPU worker count (0 = one per core) |
//! | `seqtype = {codon, aa}` | Expected state space: 61 or 20 |
//! | `branch-pairs = "(u,v),(u,v)"` | Pairs with per-site output |
//! | `bundle = PATH` | Upstream input bundle directory |
//! | `dir = PATH` | Output root |
//! | `html = NAME` | Data-Explorer page name (default `results.html`) |

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Sequence alphabet selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqType {
    /// Amino acids, n = 20.
    AminoAcid,
    /// Codons, n = 61.
    Codon,
}

impl SeqType {
    /// The state-space size this alphabet implies.
    #[must_use]
    pub const fn n(self) -> usize {
        match self {
            Self::AminoAcid => 20,
            Self::Codon => 61,
        }
    }
}

/// Parsed run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upstream input bundle directory.
    pub bundle_dir: PathBuf,
    /// Output root; artifacts land under `<dir>/UI/User/`.
    pub out_dir: PathBuf,
    /// Data-Explorer page name.
    pub html_name: String,
    /// Try GPU backends first.
    pub use_gpu: bool,
    /// Treat GPU unavailability as fatal.
    pub require_gpu: bool,
    /// CPU worker count (0 = one per core).
    pub nthreads: usize,
    /// Expected alphabet, checked against the bundle when present.
    pub seqtype: Option<SeqType>,
    /// Branch pairs selected for per-site output.
    pub selected_pairs: Vec<(usize, usize)>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::new(),
            out_dir: PathBuf::from("."),
            html_name: "results.html".into(),
            use_gpu: false,
            require_gpu: false,
            nthreads: 0,
            seqtype: None,
            selected_pairs: Vec::new(),
        }
    }
}

/// Read and parse a control file.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file cannot be read and
/// [`Error::InvalidInput`] on malformed options.
pub fn load(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&text)
}

/// Parse control-file text.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on unknown keys, malformed values,
/// or a missing `bundle` option.
pub fn parse(text: &str) -> Result<RunConfig> {
    let mut cfg = RunConfig::default();
    let mut saw_bundle = false;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::InvalidInput(format!(
                "control line {}: expected `key = value`, got `{line}`",
                lineno + 1
            )));
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "useGPU" => cfg.use_gpu = parse_flag(key, value)?,
            "requireGPU" => cfg.require_gpu = parse_flag(key, value)?,
            "nthreads" => {
                cfg.nthreads = value.parse().map_err(|_| {
                    Error::InvalidInput(format!("nthreads: `{value}` is not a count"))
                })?;
            }
            "seqtype" => {
                cfg.seqtype = Some(match value {
                    "aa" => SeqType::AminoAcid,
                    "codon" => SeqType::Codon,
                    other => {
                        return Err(Error::InvalidInput(format!(
                            "seqtype: `{other}` is neither `aa` nor `codon`"
                        )))
                    }
                });
            }
            "branch-pairs" => cfg.selected_pairs = parse_branch_pairs(value)?,
            "bundle" => {
                cfg.bundle_dir = PathBuf::from(value);
                saw_bundle = true;
            }
            "dir" => cfg.out_dir = PathBuf::from(value),
            "html" => cfg.html_name = value.to_string(),
            other => {
                return Err(Error::InvalidInput(format!(
                    "unrecognized control option `{other}`"
                )))
            }
        }
    }

    if !saw_bundle {
        return Err(Error::InvalidInput(
            "control file does not name an input `bundle`".into(),
        ));
    }
    Ok(cfg)
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(Error::InvalidInput(format!(
            "{key}: `{other}` is neither 0 nor 1"
        ))),
    }
}

/// Parse `(u,v),(u,v),...` into id pairs.
fn parse_branch_pairs(value: &str) -> Result<Vec<(usize, usize)>> {
    let mut pairs = Vec::new();
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Ok(pairs);
    }
    for part in cleaned.split("),") {
        let inner = part.trim_start_matches('(').trim_end_matches(')');
        let Some((a, b)) = inner.split_once(',') else {
            return Err(Error::InvalidInput(format!(
                "branch-pairs: `{part}` is not a (u,v) pair"
            )));
        };
        let u = a.parse().map_err(|_| {
            Error::InvalidInput(format!("branch-pairs: `{a}` is not a node id"))
        })?;
        let v = b.parse().map_err(|_| {
            Error::InvalidInput(format!("branch-pairs: `{b}` is not a node id"))
        })?;
        pairs.push((u, v));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_control_file() {
        let cfg = parse(
            "# convergence run\n\
             * PAML-style comment\n\
             bundle = data/run1\n\
             dir = out\n\
             html = myrun.html\n\
             useGPU = 1\n\
             requireGPU = 0\n\
             nthreads = 8\n\
             seqtype = aa\n\
             branch-pairs = \"(3,5),(7,9)\"\n",
        )
        .unwrap();
        assert_eq!(cfg.bundle_dir, PathBuf::from("data/run1"));
        assert_eq!(cfg.out_dir, PathBuf::from("out"));
        assert_eq!(cfg.html_name, "myrun.html");
        assert!(cfg.use_gpu);
        assert!(!cfg.require_gpu);
        assert_eq!(cfg.nthreads, 8);
        assert_eq!(cfg.seqtype, Some(SeqType::AminoAcid));
        assert_eq!(cfg.selected_pairs, vec![(3, 5), (7, 9)]);
    }

    #[test]
    fn codon_seqtype_implies_61_states() {
        let cfg = parse("bundle = b\nseqtype = codon\n").unwrap();
        assert_eq!(cfg.seqtype.map(SeqType::n), Some(61));
    }

    #[test]
    fn missing_bundle_is_invalid() {
        assert!(matches!(
            parse("useGPU = 0\n").unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn unknown_key_is_invalid() {
        assert!(parse("bundle = b\nfrobnicate = 1\n").is_err());
    }

    #[test]
    fn bad_flag_and_bad_pairs_are_invalid() {
        assert!(parse("bundle = b\nuseGPU = yes\n").is_err());
        assert!(parse("bundle = b\nbranch-pairs = (1;2)\n").is_err());
    }

    #[test]
    fn empty_branch_pairs_is_fine() {
        let cfg = parse("bundle = b\nbranch-pairs = \"\"\n").unwrap();
        assert!(cfg.selected_pairs.is_empty());
    }

    #[test]
    fn defaults_apply() {
        let cfg = parse("bundle = b\n").unwrap();
        assert_eq!(cfg.html_name, "results.html");
        assert_eq!(cfg.out_dir, PathBuf::from("."));
        assert!(!cfg.use_gpu);
        assert_eq!(cfg.nthreads, 0);
    }
}
