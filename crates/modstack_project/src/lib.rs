use serde::{Deserialize, Serialize};

mod patch;

pub use patch::{FilePatch, PatchError};

/// Highest metadata format version this crate understands.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Name of the variant every mod implicitly has.
pub const DEFAULT_VARIANT: &str = "default";

fn default_format_version() -> u32 {
    1
}

/// Describes a mod package configuration file (`mod.config.json` or `mod.config.toml`)
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ModProject {
    /// The name of the mod
    /// Must not contain spaces or special characters except for underscores and hyphens
    ///
    /// Example: `my_mod`
    pub name: String,

    /// The display name of the mod.
    ///
    /// Example: `My Mod`
    pub display_name: String,

    /// The version of the mod
    ///
    /// Example: `1.0.0`
    pub version: String,

    /// The description of the mod
    #[serde(default)]
    pub description: String,

    /// The authors of the mod
    #[serde(default)]
    pub authors: Vec<ModProjectAuthor>,

    /// The license of the mod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<ModProjectLicense>,

    /// Version of the metadata format this file was written against.
    /// Packages declaring a newer version than [`CURRENT_FORMAT_VERSION`] are rejected.
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    /// Archive files of the game installation this mod writes into.
    /// Content nested under an archive's path is applied to entries inside that archive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archives: Vec<ArchiveRegion>,

    /// Variants of the mod
    /// The `default` variant is always applied; a requested variant is layered on top of it.
    /// If not specified, a single `default` variant is assumed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ModVariant>,
}

/// An archive inside the game installation that the mod targets.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ArchiveRegion {
    /// Path of the archive file relative to the installation root
    ///
    /// Example: `data/packs/ui.zip`
    pub path: String,

    /// Identifier of the codec that reads and writes the archive
    ///
    /// Example: `zip`
    pub codec: String,
}

/// Represents a variant of a mod
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ModVariant {
    /// The name of the variant, also the name of its directory under `content/`
    ///
    /// Example: `default`, `high_res`
    pub name: String,

    /// Optional description of the variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Installation paths this variant deletes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_files: Vec<String>,

    /// Byte-level patches applied after all file additions and removals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchDeclaration>,
}

/// Patches targeting a single installation path.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PatchDeclaration {
    pub path: String,
    pub patches: Vec<FilePatch>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum ModProjectAuthor {
    Name(String),
    Role { name: String, role: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum ModProjectLicense {
    Spdx(String),
    Custom { name: String, url: String },
}

impl ModVariant {
    /// Returns the implicit default variant
    pub fn default_variant() -> Self {
        Self {
            name: DEFAULT_VARIANT.to_string(),
            description: None,
            removed_files: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEFAULT_VARIANT)
    }
}

impl ArchiveRegion {
    /// If `path` lies inside this archive, return the remainder relative to the archive.
    ///
    /// Matching is case-insensitive and accepts both `/` and `\` separators. The
    /// archive path itself (with nothing below it) does not match.
    pub fn strip_region(&self, path: &str) -> Option<String> {
        let region = path_segments(&self.path);
        let segments = path_segments(path);
        if region.is_empty() || segments.len() <= region.len() {
            return None;
        }

        let matches = region
            .iter()
            .zip(&segments)
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        matches.then(|| segments[region.len()..].join("/"))
    }
}

impl ModProject {
    /// Look up a declared variant by name (case-insensitive).
    ///
    /// The default variant always resolves, even when it isn't declared.
    pub fn variant(&self, name: &str) -> Option<ModVariant> {
        let declared = self
            .variants
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .cloned();

        match declared {
            Some(variant) => Some(variant),
            None if name.eq_ignore_ascii_case(DEFAULT_VARIANT) => {
                Some(ModVariant::default_variant())
            }
            None => None,
        }
    }

    /// Find the archive region containing `path`, preferring the most specific one.
    ///
    /// Returns the region and the path relative to the archive.
    pub fn locate(&self, path: &str) -> Option<(&ArchiveRegion, String)> {
        self.archives
            .iter()
            .filter_map(|region| region.strip_region(path).map(|rest| (region, rest)))
            .max_by_key(|(region, _)| path_segments(&region.path).len())
    }

    /// Whether this crate can interpret the declared format version.
    pub fn is_supported_format(&self) -> bool {
        self.format_version <= CURRENT_FORMAT_VERSION
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Returns the default variants for a mod project
pub fn default_variants() -> Vec<ModVariant> {
    vec![ModVariant::default_variant()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_example_project() -> ModProject {
        ModProject {
            name: "crisp-ui".to_string(),
            display_name: "Crisp UI".to_string(),
            version: "0.1.0-beta.5".to_string(),
            description: "Sharper interface textures and a quieter menu".to_string(),
            authors: vec![
                ModProjectAuthor::Name("Aster".to_string()),
                ModProjectAuthor::Role {
                    name: "Birch".to_string(),
                    role: "Contributor".to_string(),
                },
            ],
            license: Some(ModProjectLicense::Spdx("MIT".to_string())),
            format_version: 1,
            archives: vec![ArchiveRegion {
                path: "data/packs/ui.zip".to_string(),
                codec: "zip".to_string(),
            }],
            variants: vec![
                ModVariant {
                    name: "default".to_string(),
                    description: Some("Base textures".to_string()),
                    removed_files: vec!["data/sound/menu_loop.ogg".to_string()],
                    patches: vec![PatchDeclaration {
                        path: "data/config/ui.ini".to_string(),
                        patches: vec![
                            FilePatch::Replace {
                                find: "scale=1".to_string(),
                                replace: "scale=2".to_string(),
                            },
                            FilePatch::Overwrite {
                                offset: 4,
                                data: vec![0xde, 0xad],
                            },
                        ],
                    }],
                },
                ModVariant {
                    name: "high_res".to_string(),
                    description: Some("4K textures".to_string()),
                    removed_files: vec![],
                    patches: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_json_parsing() {
        let project: ModProject =
            serde_json::from_str(include_str!("../test-data/mod.config.json")).unwrap();

        assert_eq!(project, create_example_project());
    }

    #[test]
    fn test_toml_parsing() {
        let project: ModProject =
            toml::from_str(include_str!("../test-data/mod.config.toml")).unwrap();

        assert_eq!(project, create_example_project());
    }

    #[test]
    fn test_optional_fields_default() {
        let config = r#"
        {
            "name": "test-mod",
            "display_name": "Test Mod",
            "version": "1.0.0"
        }
        "#;

        let project: ModProject = serde_json::from_str(config).unwrap();
        assert_eq!(project.format_version, 1);
        assert!(project.archives.is_empty());
        assert!(project.variants.is_empty());
        assert!(project.authors.is_empty());
        assert!(project.is_supported_format());
    }

    #[test]
    fn test_future_format_unsupported() {
        let config = r#"
        {
            "name": "test-mod",
            "display_name": "Test Mod",
            "version": "1.0.0",
            "format_version": 7
        }
        "#;

        let project: ModProject = serde_json::from_str(config).unwrap();
        assert!(!project.is_supported_format());
    }

    #[test]
    fn test_default_variant_is_implicit() {
        let mut project = create_example_project();
        project.variants.clear();

        let variant = project.variant("default").unwrap();
        assert!(variant.is_default());
        assert!(project.variant("high_res").is_none());
    }

    #[test]
    fn test_variant_lookup_ignores_case() {
        let project = create_example_project();
        assert_eq!(project.variant("HIGH_RES").unwrap().name, "high_res");
    }

    #[test]
    fn test_strip_region() {
        let region = ArchiveRegion {
            path: "data/packs/ui.zip".to_string(),
            codec: "zip".to_string(),
        };

        assert_eq!(
            region.strip_region("Data\\Packs\\UI.zip\\icons/a.png"),
            Some("icons/a.png".to_string())
        );
        assert_eq!(region.strip_region("data/packs/ui.zip"), None);
        assert_eq!(region.strip_region("data/packs/ui.zipx/a.png"), None);
        assert_eq!(region.strip_region("data/other.txt"), None);
    }

    #[test]
    fn test_locate_prefers_longest_region() {
        let mut project = create_example_project();
        project.archives.push(ArchiveRegion {
            path: "data".to_string(),
            codec: "outer".to_string(),
        });

        let (region, rest) = project.locate("data/packs/ui.zip/icons/a.png").unwrap();
        assert_eq!(region.codec, "zip");
        assert_eq!(rest, "icons/a.png");

        let (region, rest) = project.locate("data/foo.txt").unwrap();
        assert_eq!(region.codec, "outer");
        assert_eq!(rest, "foo.txt");
    }

    #[test]
    fn test_default_variants() {
        let variants = default_variants();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].name, DEFAULT_VARIANT);
    }
}
