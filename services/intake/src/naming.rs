use crate::normalizer::canonical_extension;
use std::collections::HashSet;

/// Issues unique object names for one batch.
///
/// Format: `{timestamp}_{suffix}.{ext}`, e.g. `2024-01-15_10-30-45_9f86d081.jpg`,
/// where the timestamp is captured once per batch and the suffix carries
/// 32 random bits.
#[derive(Debug)]
pub struct FilenameGenerator {
    stamp: String,
    issued: HashSet<String>,
}

impl FilenameGenerator {
    /// Start a batch from its `YYYY-MM-DD HH:MM:SS` timestamp
    pub fn for_batch(timestamp: &str) -> Self {
        Self {
            stamp: sanitize_timestamp(timestamp),
            issued: HashSet::new(),
        }
    }

    /// Generate the next name; never repeats within the batch
    pub fn next_name(&mut self, extension: &str) -> String {
        let ext = canonical_extension(extension);
        loop {
            let name = format!("{}_{:08x}.{}", self.stamp, rand::random::<u32>(), ext);
            if self.issued.insert(name.clone()) {
                return name;
            }
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

/// Make a timestamp safe for object keys and file titles
pub fn sanitize_timestamp(timestamp: &str) -> String {
    timestamp
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            ':' => '-',
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_timestamp() {
        assert_eq!(sanitize_timestamp("2024-01-15 10:30:45"), "2024-01-15_10-30-45");
        assert_eq!(sanitize_timestamp("2024/01/15 10:30"), "2024_01_15_10-30");
    }

    #[test]
    fn test_name_format() {
        let mut names = FilenameGenerator::for_batch("2024-01-15 10:30:45");
        let name = names.next_name("JPEG");

        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        let suffix = stem.strip_prefix("2024-01-15_10-30-45_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_thousand_names_are_unique() {
        let mut names = FilenameGenerator::for_batch("2024-01-15 10:30:45");
        let generated: HashSet<String> = (0..1000).map(|_| names.next_name("jpg")).collect();
        assert_eq!(generated.len(), 1000);
        assert_eq!(names.issued(), 1000);
    }

    #[test]
    fn test_batches_share_prefix_but_not_names() {
        let mut a = FilenameGenerator::for_batch("2024-01-15 10:30:45");
        let mut b = FilenameGenerator::for_batch("2024-01-15 10:30:45");
        let first: HashSet<String> = (0..200).map(|_| a.next_name("jpg")).collect();
        let second: HashSet<String> = (0..200).map(|_| b.next_name("jpg")).collect();
        assert!(first.is_disjoint(&second));
    }
}
