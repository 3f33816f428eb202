use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::PartitionConfig;

/// `<root>/%y%M%d/%H/<anything>`. The lazy group picks the first occurrence of
/// the time-partitioning suffix.
static ROOT_TEMPLATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)/%y%M%d/%H/.*$").expect("root template regex is valid"));

/// `scheme://authority` at the start of a URI-style root, e.g. `hdfs://nn1`.
static URI_AUTHORITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*://[^/]*)(.*)$").expect("uri authority regex is valid")
});

/// A distinct root directory and the partition chosen to stand for it.
///
/// The representative is whichever partition with this root came first in the
/// configuration list, so it can change between passes if that order does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueRoot {
    pub root: String,
    pub partition_id: String,
}

/// The universe of flag assignments for one balance pass, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct UniqueRoots {
    roots: Vec<UniqueRoot>,
    partition_ids: HashSet<String>,
}

/// Output of [`resolve_unique_roots`]: the roots, plus every partition that
/// was left out because its template could not be parsed.
#[derive(Debug, Default)]
pub struct RootResolution {
    pub roots: UniqueRoots,
    pub failures: Vec<Error>,
}

/// Extract the root directory from a path template.
///
/// The root is normalized the way a filesystem path would be: repeated `/`
/// collapse and a trailing `/` is dropped, so `/a//b/` and `/a/b` are the same
/// root. A leading `scheme://authority` is kept as is.
pub fn root_from_template(partition_id: &str, template: &str) -> Result<String> {
    let malformed = || Error::MalformedTemplate {
        partition_id: partition_id.to_string(),
        template: template.to_string(),
    };

    let prefix = ROOT_TEMPLATE_REGEX
        .captures(template)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(malformed)?;

    let normalized = normalize_path(prefix);
    if normalized.is_empty() {
        return Err(malformed());
    }
    Ok(normalized)
}

fn normalize_path(path: &str) -> String {
    if let Some(caps) = URI_AUTHORITY_REGEX.captures(path) {
        let authority = &caps[1];
        return match normalize_segments(&caps[2]).as_str() {
            "" | "/" => authority.to_string(),
            rest => format!("{authority}{rest}"),
        };
    }
    normalize_segments(path)
}

fn normalize_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, _) => joined,
    }
}

/// Reduce the configured partitions to one representative per distinct root.
///
/// Partitions with an unparsable template, or whose id already stands for a
/// different root, are skipped and reported in [`RootResolution::failures`];
/// they never abort the rest of the scan.
pub fn resolve_unique_roots(configs: &[PartitionConfig]) -> RootResolution {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut resolution = RootResolution::default();

    for config in configs {
        let root = match root_from_template(&config.id, &config.path_template) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(partition_id = %config.id, error = %e, "skipping partition");
                resolution.failures.push(e);
                continue;
            }
        };

        if let Some(representative) = seen.get(&root) {
            // Same root, so nothing is lost even if the id is reused.
            tracing::debug!(
                partition_id = %config.id,
                representative = %representative,
                root = %root,
                "root already covered by another partition"
            );
            continue;
        }

        if resolution.roots.contains_partition(&config.id) {
            let e = Error::DuplicatePartition {
                partition_id: config.id.clone(),
                root,
            };
            tracing::warn!(partition_id = %config.id, error = %e, "skipping partition");
            resolution.failures.push(e);
            continue;
        }

        tracing::info!(
            partition_id = %config.id,
            root = %root,
            "partition is the first instance with a unique root"
        );
        seen.insert(root.clone(), config.id.clone());
        resolution.roots.push(UniqueRoot {
            root,
            partition_id: config.id.clone(),
        });
    }

    resolution
}

impl UniqueRoots {
    /// Build directly from `(root, partition_id)` pairs, dropping any root or
    /// partition id that was already seen.
    pub fn from_pairs<I, R, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (R, P)>,
        R: Into<String>,
        P: Into<String>,
    {
        let mut roots = Self::default();
        for (root, partition_id) in pairs {
            roots.push(UniqueRoot {
                root: root.into(),
                partition_id: partition_id.into(),
            });
        }
        roots
    }

    fn push(&mut self, root: UniqueRoot) {
        if self.roots.iter().any(|r| r.root == root.root)
            || self.partition_ids.contains(&root.partition_id)
        {
            return;
        }
        self.partition_ids.insert(root.partition_id.clone());
        self.roots.push(root);
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniqueRoot> {
        self.roots.iter()
    }

    /// Whether `partition_id` is the representative of a root of interest.
    pub fn contains_partition(&self, partition_id: &str) -> bool {
        self.partition_ids.contains(partition_id)
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(|r| r.partition_id.as_str())
    }
}
