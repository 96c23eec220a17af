//! "-want +got" rendering of mismatches

use std::fmt::Write as _;

use super::Mismatch;

/// Render mismatches in the order they were found
pub fn render(mismatches: &[Mismatch]) -> String {
    let mut out = String::from("diff -want +got:\n");
    for m in mismatches {
        let _ = writeln!(out, "  {}:", m.path);
        let _ = writeln!(out, "-   {}", m.want);
        let _ = writeln!(out, "+   {}", m.got);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Path;

    #[test]
    fn test_render() {
        let diff = render(&[Mismatch {
            path: Path::root().key("status"),
            want: "200".into(),
            got: "404".into(),
        }]);
        assert_eq!(diff, "diff -want +got:\n  .status:\n-   200\n+   404\n");
    }
}
