//! Output namespaces.
//!
//! Every task declares which part of the output directory it writes to. The
//! claims are checked for overlap when a pipeline is assembled, so two tasks
//! can never silently overwrite each other's files.

use std::fmt::Display;

use camino::Utf8PathBuf;
use thiserror::Error;

/// A part of the output directory owned by one task. Paths are relative to the
/// output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The whole subtree below a directory.
    Tree(Utf8PathBuf),
    /// Only the files directly inside a directory.
    Flat(Utf8PathBuf),
    /// Exactly one file.
    File(Utf8PathBuf),
}

impl Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Tree(path) => write!(f, "{path}/**"),
            Claim::Flat(path) => write!(f, "{path}/*"),
            Claim::File(path) => write!(f, "{path}"),
        }
    }
}

impl Claim {
    /// Whether some output path could belong to both claims.
    pub fn overlaps(&self, other: &Claim) -> bool {
        use Claim::*;

        match (self, other) {
            (Tree(a), Tree(b)) => a.starts_with(b) || b.starts_with(a),
            // a tree nested inside a flat directory only holds subdirectories
            (Tree(tree), Flat(dir)) | (Flat(dir), Tree(tree)) => dir.starts_with(tree),
            (Tree(tree), File(file)) | (File(file), Tree(tree)) => file.starts_with(tree),
            (Flat(a), Flat(b)) => a == b,
            (Flat(dir), File(file)) | (File(file), Flat(dir)) => {
                file.parent() == Some(dir.as_path())
            }
            (File(a), File(b)) => a == b,
        }
    }
}

#[derive(Debug, Error)]
#[error("tasks '{first}' ({first_claim}) and '{second}' ({second_claim}) write to the same output paths")]
pub struct ClaimError {
    pub first: String,
    pub first_claim: Claim,
    pub second: String,
    pub second_claim: Claim,
}

/// Checks that no two claims of different tasks overlap.
pub fn validate<'a>(
    claims: impl IntoIterator<Item = (&'a str, Claim)>,
) -> Result<(), ClaimError> {
    let claims: Vec<_> = claims.into_iter().collect();

    for (i, (first, first_claim)) in claims.iter().enumerate() {
        for (second, second_claim) in &claims[i + 1..] {
            if first != second && first_claim.overlaps(second_claim) {
                return Err(ClaimError {
                    first: first.to_string(),
                    first_claim: first_claim.clone(),
                    second: second.to_string(),
                    second_claim: second_claim.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(p: &str) -> Claim {
        Claim::Tree(p.into())
    }

    fn flat(p: &str) -> Claim {
        Claim::Flat(p.into())
    }

    fn file(p: &str) -> Claim {
        Claim::File(p.into())
    }

    #[test]
    fn test_tree_overlaps_everything_below() {
        assert!(tree("css").overlaps(&tree("css")));
        assert!(tree("css").overlaps(&tree("css/vendor")));
        assert!(tree("css/vendor").overlaps(&tree("css")));
        assert!(tree("css").overlaps(&file("css/a.min.css")));
        assert!(file("css/a.min.css").overlaps(&tree("css")));
        assert!(tree("img").overlaps(&flat("img/svg")));
    }

    #[test]
    fn test_flat_leaves_subdirectories_free() {
        assert!(!flat("img").overlaps(&tree("img/svg")));
        assert!(!tree("img/svg").overlaps(&flat("img")));
        assert!(!flat("img").overlaps(&file("img/svg/sprite.svg")));
        assert!(flat("img").overlaps(&file("img/logo.png")));
        assert!(flat("img").overlaps(&flat("img")));
    }

    #[test]
    fn test_disjoint() {
        assert!(!tree("css").overlaps(&tree("js")));
        assert!(!tree("css").overlaps(&tree("css2")));
        assert!(!file("index.html").overlaps(&tree("css")));
        assert!(!file("index.html").overlaps(&file("about.html")));
        assert!(file("index.html").overlaps(&file("index.html")));
    }

    #[test]
    fn test_validate_reports_both_tasks() {
        let err = validate([
            ("styles", tree("css")),
            ("html", file("index.html")),
            ("resources", file("index.html")),
        ])
        .unwrap_err();

        assert_eq!(err.first, "html");
        assert_eq!(err.second, "resources");
    }

    #[test]
    fn test_validate_same_task_may_repeat() {
        assert!(validate([("images", flat("img")), ("images", file("img/a.png"))]).is_ok());
    }
}
