// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTML page generation by marker-line substitution.
//!
//! Each page comes from a static template scanned line by line. A line
//! containing a marker is copied through, then the marker's expansion is
//! appended after it:
//!
//! - `@dataTag` — a `<script>` tag pulling in the data file
//! - `@tableAndPlot` — per-pair bar-plot and sheet containers, or the
//!   explanatory placeholder when no pairs were selected
//! - `@rateVsDivPlot` — per-pair containers (no placeholder)
//! - `@plot` — per-pair scatter containers, or the placeholder
//!
//! Markers absent from a template are naturally no-ops; one line can
//! trigger several markers.

use std::fmt::Write as _;

/// Landing page: tree viewer plus convergence/divergence scatter.
pub const MAIN: &str = include_str!("templates/main.html");
/// Branch-pair sheet popup.
pub const SHEET: &str = include_str!("templates/sheet.html");
/// Per-site popup for selected pairs.
pub const SITE_SPECIFIC: &str = include_str!("templates/site_specific.html");
/// Substitution rate vs. diversity popup.
pub const RATE_VS_DIVERSITY: &str = include_str!("templates/rate_vs_diversity.html");
/// Substitution rate vs. convergence probability popup.
pub const RATE_VS_PROB_CONVERGENCE: &str =
    include_str!("templates/rate_vs_prob_convergence.html");

const PLACEHOLDER: &str = "<h4 style=\"float:left; margin-left:70px\"> Branch Pairs must be \
provided for this plot (see the <i>branch-pairs</i> option)</h4>";

/// Expand `template` against the data file and the selected pairs.
#[must_use]
pub fn render(template: &str, data_file: &str, selected: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(template.len());
    for line in template.lines() {
        out.push_str(line);
        out.push('\n');
        if line.contains("@dataTag") {
            let _ = writeln!(out, "<script src=\"{data_file}\"></script>");
        }
        if line.contains("@tableAndPlot") {
            for &(u, v) in selected {
                let _ = writeln!(
                    out,
                    "<div id=\"BP_{u}x{v}-barPlot\"></div>\n\
                     <div data-collapse style=\"float:centre\">\n\
                     \t<h4 style=\"float:centre; margin-left:500px\"> Sites <br> Branch Pair: {u}..{v} </h4>\n\
                     <div id=\"BP_{u}x{v}-sheet\" style=\"float:centre; margin-left:150px; margin-right:150px\"></div>\n\
                     </div><br>\n"
                );
            }
            if selected.is_empty() {
                out.push_str(PLACEHOLDER);
                out.push('\n');
            }
        }
        if line.contains("@rateVsDivPlot") {
            for &(u, v) in selected {
                let _ = writeln!(
                    out,
                    "<div id=\"BP_{u}x{v}-barPlot\"></div>\n\
                     <div data-collapse style=\"float:centre\">\n\
                     \t<h4 style=\"float:centre; margin-left:500px\"> Sites <br> Branch Pair: {u}..{v} </h4>\n\
                     <div id=\"BP_{u}x{v}-sheet\" style=\"float:centre; margin-left:150px; margin-right:150px\"></div>\n\
                     </div><br>\n"
                );
            }
        }
        if line.contains("@plot") {
            for &(u, v) in selected {
                let _ = writeln!(
                    out,
                    "<div id=\"figure\" style=\"float:left; width:550px; z-index:2000; background-color: #ffffff; \">\n\
                     <h4 style=\"float:left; margin-left:70px\"> Branch Pair: {u}..{v} </h4>\n\
                     <div id=\"BP_{u}x{v}-data-plot\" style=\"margin-left: 10px; float:left; width:540px; outline: 0 !important; border: 0 !important; \"></div>\n\
                     </div>"
                );
            }
            if selected.is_empty() {
                out.push_str(PLACEHOLDER);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_tag_expands_to_script() {
        let html = render("<!-- @dataTag -->", "resultsData.js", &[]);
        assert!(html.contains("<script src=\"resultsData.js\"></script>"));
        assert!(html.contains("<!-- @dataTag -->"), "marker line kept");
    }

    #[test]
    fn plot_marker_emits_one_container_per_pair() {
        let html = render("<!-- @plot -->", "d.js", &[(3, 5), (4, 7)]);
        assert!(html.contains("BP_3x5-data-plot"));
        assert!(html.contains("BP_4x7-data-plot"));
        assert!(!html.contains("must be provided"));
    }

    #[test]
    fn empty_selection_yields_placeholder() {
        let html = render("<!-- @plot -->", "d.js", &[]);
        assert!(html.contains("Branch Pairs must be provided"));
        let html = render("<!-- @tableAndPlot -->", "d.js", &[]);
        assert!(html.contains("Branch Pairs must be provided"));
    }

    #[test]
    fn rate_vs_div_marker_has_no_placeholder() {
        let html = render("<!-- @rateVsDivPlot -->", "d.js", &[]);
        assert!(!html.contains("must be provided"));
    }

    #[test]
    fn absent_markers_are_noops() {
        let template = "<html>\n<body>\n</body>\n</html>";
        let html = render(template, "d.js", &[(1, 2)]);
        assert_eq!(html, "<html>\n<body>\n</body>\n</html>\n");
    }

    #[test]
    fn table_marker_does_not_trigger_plot_marker() {
        // "@tableAndPlot" must not be mistaken for "@plot".
        let html = render("<!-- @tableAndPlot -->", "d.js", &[(1, 2)]);
        assert!(html.contains("BP_1x2-sheet"));
        assert!(!html.contains("BP_1x2-data-plot"));
    }

    #[test]
    fn every_bundled_template_carries_the_data_tag() {
        for template in [
            MAIN,
            SHEET,
            SITE_SPECIFIC,
            RATE_VS_DIVERSITY,
            RATE_VS_PROB_CONVERGENCE,
        ] {
            let html = render(template, "xData.js", &[]);
            assert!(html.contains("<script src=\"xData.js\"></script>"));
        }
    }
}
