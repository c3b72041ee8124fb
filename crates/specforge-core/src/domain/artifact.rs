//! Generated artifacts and the per-job artifact bag.

use serde::{Deserialize, Serialize};

use super::digest::checksum;

/// Category an artifact is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    Schema,
    Backend,
    Frontend,
    Infrastructure,
    Tests,
    Documentation,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 6] = [
        ArtifactCategory::Schema,
        ArtifactCategory::Backend,
        ArtifactCategory::Frontend,
        ArtifactCategory::Infrastructure,
        ArtifactCategory::Tests,
        ArtifactCategory::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactCategory::Schema => "schema",
            ArtifactCategory::Backend => "backend",
            ArtifactCategory::Frontend => "frontend",
            ArtifactCategory::Infrastructure => "infrastructure",
            ArtifactCategory::Tests => "tests",
            ArtifactCategory::Documentation => "documentation",
        }
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file as returned by a generator collaborator, before checksumming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    /// Free-form file type (e.g. "sql", "json", "tsx").
    #[serde(rename = "type")]
    pub file_type: String,
}

impl GeneratedFile {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            file_type: file_type.into(),
        }
    }
}

/// One generated file with its change-detection checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub checksum: String,
}

impl From<GeneratedFile> for Artifact {
    fn from(file: GeneratedFile) -> Self {
        let checksum = checksum(&file.content);
        Self {
            path: file.path,
            content: file.content,
            file_type: file.file_type,
            checksum,
        }
    }
}

/// Categorized, append-only collection of a job's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBag {
    pub schema: Vec<Artifact>,
    pub backend: Vec<Artifact>,
    pub frontend: Vec<Artifact>,
    pub infrastructure: Vec<Artifact>,
    pub tests: Vec<Artifact>,
    pub documentation: Vec<Artifact>,
}

impl ArtifactBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(&self, category: ArtifactCategory) -> &[Artifact] {
        match category {
            ArtifactCategory::Schema => &self.schema,
            ArtifactCategory::Backend => &self.backend,
            ArtifactCategory::Frontend => &self.frontend,
            ArtifactCategory::Infrastructure => &self.infrastructure,
            ArtifactCategory::Tests => &self.tests,
            ArtifactCategory::Documentation => &self.documentation,
        }
    }

    fn category_mut(&mut self, category: ArtifactCategory) -> &mut Vec<Artifact> {
        match category {
            ArtifactCategory::Schema => &mut self.schema,
            ArtifactCategory::Backend => &mut self.backend,
            ArtifactCategory::Frontend => &mut self.frontend,
            ArtifactCategory::Infrastructure => &mut self.infrastructure,
            ArtifactCategory::Tests => &mut self.tests,
            ArtifactCategory::Documentation => &mut self.documentation,
        }
    }

    /// Append generated files under `category`. Returns how many were added.
    pub fn append(
        &mut self,
        category: ArtifactCategory,
        files: impl IntoIterator<Item = GeneratedFile>,
    ) -> usize {
        let bucket = self.category_mut(category);
        let before = bucket.len();
        bucket.extend(files.into_iter().map(Artifact::from));
        bucket.len() - before
    }

    /// Append already-built artifacts whose path is not yet in the bag.
    pub fn append_new(&mut self, category: ArtifactCategory, artifacts: Vec<Artifact>) -> usize {
        let mut added = 0;
        for artifact in artifacts {
            if self.find(&artifact.path).is_none() {
                self.category_mut(category).push(artifact);
                added += 1;
            }
        }
        added
    }

    /// Look up an artifact by path across all categories.
    pub fn find(&self, path: &str) -> Option<&Artifact> {
        self.iter().map(|(_, a)| a).find(|a| a.path == path)
    }

    /// Iterate `(category, artifact)` pairs in category order.
    pub fn iter(&self) -> impl Iterator<Item = (ArtifactCategory, &Artifact)> {
        ArtifactCategory::ALL
            .into_iter()
            .flat_map(move |c| self.category(c).iter().map(move |a| (c, a)))
    }

    pub fn len(&self) -> usize {
        ArtifactCategory::ALL
            .iter()
            .map(|c| self.category(*c).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_checksums_content() {
        let mut bag = ArtifactBag::new();
        let added = bag.append(
            ArtifactCategory::Schema,
            vec![GeneratedFile::new("schema/001.sql", "CREATE TABLE t ();", "sql")],
        );
        assert_eq!(added, 1);
        let artifact = bag.find("schema/001.sql").expect("artifact");
        assert_eq!(artifact.checksum, checksum("CREATE TABLE t ();"));
    }

    #[test]
    fn test_append_new_skips_known_paths() {
        let mut bag = ArtifactBag::new();
        bag.append(
            ArtifactCategory::Backend,
            vec![GeneratedFile::new("a.rs", "a", "rust")],
        );
        let dup = Artifact::from(GeneratedFile::new("a.rs", "changed", "rust"));
        let fresh = Artifact::from(GeneratedFile::new("b.rs", "b", "rust"));
        assert_eq!(
            bag.append_new(ArtifactCategory::Backend, vec![dup, fresh]),
            1
        );
        assert_eq!(bag.find("a.rs").unwrap().content, "a");
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_iter_follows_category_order() {
        let mut bag = ArtifactBag::new();
        bag.append(
            ArtifactCategory::Tests,
            vec![GeneratedFile::new("t", "", "txt")],
        );
        bag.append(
            ArtifactCategory::Schema,
            vec![GeneratedFile::new("s", "", "sql")],
        );
        let cats: Vec<_> = bag.iter().map(|(c, _)| c).collect();
        assert_eq!(cats, vec![ArtifactCategory::Schema, ArtifactCategory::Tests]);
    }
}
