use glob::Pattern;

/// Result of matching the watch patterns against the remote branch list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BranchMatch {
    /// Concrete branch names, in remote order, without duplicates
    pub branches: Vec<String>,
    /// Patterns that matched no remote branch
    pub unmatched: Vec<String>,
}

/// Match space separated glob patterns (`*` = all, `release*`, ...)
/// against the branches advertised by the remote.
///
/// A pattern that does not parse as a glob is compared literally.
pub fn match_branches(patterns: &str, remote_branches: &[String]) -> BranchMatch {
    let mut result = BranchMatch::default();

    for raw in patterns.split_whitespace() {
        let matched: Vec<&String> = match Pattern::new(raw) {
            Ok(pattern) => remote_branches
                .iter()
                .filter(|b| pattern.matches(b))
                .collect(),
            Err(_) => remote_branches.iter().filter(|b| *b == raw).collect(),
        };

        if matched.is_empty() {
            result.unmatched.push(raw.to_string());
            continue;
        }
        for branch in matched {
            if !result.branches.contains(branch) {
                result.branches.push(branch.clone());
            }
        }
    }

    result
}
