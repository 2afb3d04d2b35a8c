// src/container/listing.rs

//! Matching a container name against `ls` output
//!
//! The helper prints the runtime's image table:
//!
//! ```text
//! REPOSITORY           TAG       IMAGE ID       CREATED       SIZE
//! flmcode/dangerzone   latest    0123456789ab   2 days ago    1.1GB
//! ```
//!
//! A name matches only a whole repository field, or `repository:tag`.

/// Whether `stdout` lists an image named exactly `name`
pub fn container_listed(stdout: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    stdout.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let Some(repository) = fields.next() else {
            return false;
        };
        if repository == "REPOSITORY" {
            return false;
        }
        if repository == name {
            return true;
        }
        match fields.next() {
            Some(tag) => name
                .strip_prefix(repository)
                .and_then(|rest| rest.strip_prefix(':'))
                .is_some_and(|t| t == tag),
            None => false,
        }
    })
}
