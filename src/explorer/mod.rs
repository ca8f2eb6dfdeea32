// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data-Explorer emission: tree JSON, scatter data file, per-site tables,
//! and the HTML shell pages.
//!
//! Everything lands under `<dir>/UI/User/`. The data file is a JS
//! fragment (`<base>Data.js`) defining the variables the browser-side
//! plots read: regression coefficients, the tree, the per-pair scatter
//! arrays, per-site metadata, and one `BP_uxv` array per selected pair.
//!
//! Data numbers print with fixed six-decimal precision; the regression
//! coefficients print at default precision. Every artifact is written to
//! a temporary sibling path and renamed into place on success, so a
//! failing run never clobbers previous outputs.

pub mod html;

use crate::error::{Error, Result};
use crate::phylo::{BranchPair, TreeModel};
use crate::regression::Regression;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the sink needs from the finished analysis.
#[derive(Debug, Clone, Copy)]
pub struct ExplorerData<'a> {
    /// The analyzed tree.
    pub tree: &'a TreeModel,
    /// Enumerated pairs, in output order.
    pub pairs: &'a [BranchPair],
    /// Per-pair summed convergence probabilities.
    pub p_convergent: &'a [f64],
    /// Per-pair summed divergence probabilities.
    pub p_divergent: &'a [f64],
    /// Selected-major per-site table (`[slot][site][conv, div]`).
    pub site_table: &'a [f64],
    /// Fitted null regression.
    pub regression: Regression,
    /// Posterior number of substitutions per site.
    pub post_num_sub: &'a [f64],
    /// Rate class per site.
    pub site_class: &'a [i32],
    /// Number of alignment sites.
    pub num_sites: usize,
}

/// Writes all artifacts for one run under `<dir>/UI/User/`.
#[derive(Debug, Clone)]
pub struct ResultSink {
    out_root: PathBuf,
    html_name: String,
}

impl ResultSink {
    /// A sink rooted at `out_root`, naming pages after `html_name`
    /// (e.g. `results.html`).
    #[must_use]
    pub fn new(out_root: impl Into<PathBuf>, html_name: impl Into<String>) -> Self {
        Self {
            out_root: out_root.into(),
            html_name: html_name.into(),
        }
    }

    /// Emit the data file, the tree JSON, and the five HTML pages.
    ///
    /// Returns the paths written, data file first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when a directory or file cannot be written,
    /// and [`Error::InvalidInput`] when array lengths disagree.
    pub fn emit(&self, data: &ExplorerData<'_>) -> Result<Vec<PathBuf>> {
        let num_pairs = data.pairs.len();
        if data.p_convergent.len() != num_pairs || data.p_divergent.len() != num_pairs {
            return Err(Error::InvalidInput(
                "scatter arrays do not match the pair count".into(),
            ));
        }
        let selected: Vec<&BranchPair> = data.pairs.iter().filter(|p| p.selected).collect();
        if data.site_table.len() != selected.len() * data.num_sites * 2 {
            return Err(Error::InvalidInput(
                "site table does not match the selection".into(),
            ));
        }

        let user_dir = self.out_root.join("UI").join("User");
        fs::create_dir_all(&user_dir).map_err(|e| Error::Io {
            path: user_dir.clone(),
            source: e,
        })?;

        let base = self
            .html_name
            .split('.')
            .next()
            .unwrap_or(self.html_name.as_str());
        let data_file = format!("{base}Data.js");
        let tree_file = format!("{base}Tree.json");

        let mut written = Vec::new();

        let data_path = user_dir.join(&data_file);
        write_atomic(&data_path, &self.render_data_js(data, &selected)?)?;
        written.push(data_path);

        let tree_path = user_dir.join(&tree_file);
        let tree_json = serde_json::to_string(&data.tree.to_json())
            .map_err(|e| Error::InvalidInput(format!("tree serialization: {e}")))?;
        write_atomic(&tree_path, &tree_json)?;
        written.push(tree_path);

        let selected_ids: Vec<(usize, usize)> = selected.iter().map(|p| (p.u, p.v)).collect();
        let no_pairs: &[(usize, usize)] = &[];
        let pages: [(&str, String, &[(usize, usize)]); 5] = [
            (html::MAIN, self.html_name.clone(), no_pairs),
            (html::SHEET, format!("sheet-{}", self.html_name), no_pairs),
            (
                html::SITE_SPECIFIC,
                format!("siteSpecific-{}", self.html_name),
                &selected_ids,
            ),
            (
                html::RATE_VS_DIVERSITY,
                format!("rateVsDiversity-{}", self.html_name),
                no_pairs,
            ),
            (
                html::RATE_VS_PROB_CONVERGENCE,
                format!("rateVsProbConvergence-{}", self.html_name),
                &selected_ids,
            ),
        ];
        for (template, file_name, pairs) in pages {
            let path = user_dir.join(file_name);
            write_atomic(&path, &html::render(template, &data_file, pairs))?;
            written.push(path);
        }
        Ok(written)
    }

    /// The JS data fragment: popup openers, regression coefficients,
    /// tree, scatter arrays, site metadata, per-pair site arrays.
    fn render_data_js(
        &self,
        data: &ExplorerData<'_>,
        selected: &[&BranchPair],
    ) -> Result<String> {
        let mut out = String::new();

        for (func, prefix) in [
            ("openSheetPopup", "sheet-"),
            ("openSiteSpecificPopup", "siteSpecific-"),
            ("openRateVsDiversityPopup", "rateVsDiversity-"),
            ("openRateVsProbConvergencePopup", "rateVsProbConvergence-"),
        ] {
            let _ = writeln!(
                out,
                "function {func}() {{\n    window.open(\"{prefix}{}\", \"{func}Viewer\", strWindowFeatures);\n}}",
                self.html_name
            );
        }
        out.push('\n');

        let _ = writeln!(out, "regressionSlope = {};", data.regression.slope);
        let _ = writeln!(out, "regressionIntercept = {};", data.regression.intercept);
        let _ = writeln!(out, "numOfSelectedBranchPairs = {};", selected.len());
        let _ = writeln!(out, "numOfSites = {};", data.num_sites);

        let tree_json = serde_json::to_string(&data.tree.to_json())
            .map_err(|e| Error::InvalidInput(format!("tree serialization: {e}")))?;
        let _ = writeln!(out, "tree = {tree_json};");

        let _ = writeln!(out, "xPoints = {};", js_floats(data.p_divergent));
        let _ = writeln!(out, "yPoints = {};", js_floats(data.p_convergent));

        let labels: Vec<String> = data
            .pairs
            .iter()
            .map(|p| {
                let fu = data.tree.father(p.u).unwrap_or(p.u);
                let fv = data.tree.father(p.v).unwrap_or(p.v);
                format!("\"{fu}..{} x {fv}..{}\"", p.u, p.v)
            })
            .collect();
        let _ = writeln!(out, "labels = {};", js_list(&labels));

        let _ = writeln!(out, "xPostNumSub = {};", js_floats(data.post_num_sub));
        let classes: Vec<String> = data.site_class.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "ySiteClass = {};", js_list(&classes));

        for (slot, pair) in selected.iter().enumerate() {
            let mut rows = Vec::new();
            for site in 0..data.num_sites {
                let cell = (slot * data.num_sites + site) * 2;
                let conv = data.site_table[cell];
                let div = data.site_table[cell + 1];
                if conv != 0.0 || div != 0.0 {
                    rows.push(format!("[{site}, {conv:.6}, {div:.6}]"));
                }
            }
            let _ = writeln!(out, "BP_{}x{} = {};", pair.u, pair.v, js_list(&rows));
        }

        let ids: Vec<String> = selected
            .iter()
            .map(|p| format!("BP_{}x{}", p.u, p.v))
            .collect();
        let quoted_ids: Vec<String> = ids.iter().map(|i| format!("\"{i}\"")).collect();
        let names: Vec<String> = selected
            .iter()
            .map(|p| format!("\"Branch Pair: {}..{}\"", p.u, p.v))
            .collect();
        let _ = writeln!(out, "siteSpecificBranchPairs = {};", js_list(&ids));
        let _ = writeln!(out, "siteSpecificBranchPairsName = {};", js_list(&names));
        let _ = writeln!(out, "siteSpecificBranchPairsIDs = {};", js_list(&quoted_ids));

        Ok(out)
    }
}

/// `[ a, b, c ]` with six-decimal entries, `[ ]` when empty.
fn js_floats(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.6}")).collect();
    js_list(&parts)
}

/// `[ a, b, c ]` over preformatted entries, `[ ]` when empty.
fn js_list(parts: &[String]) -> String {
    if parts.is_empty() {
        "[ ]".to_string()
    } else {
        format!("[ {} ]", parts.join(", "))
    }
}

/// Write to a temporary sibling, rename into place on success.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_os_string());
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, contents).map_err(|e| Error::Io {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
