use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegmentationError};

/// Number of Cityscapes class groups the model was trained on.
pub const NUM_CLASSES: usize = 8;

pub const DEFAULT_CLASS_NAMES: [&str; NUM_CLASSES] = [
    "flat",
    "human",
    "vehicle",
    "construction",
    "object",
    "nature",
    "sky",
    "void",
];

pub const DEFAULT_CLASS_COLORS: [[u8; 3]; NUM_CLASSES] = [
    [128, 64, 128],
    [220, 20, 60],
    [0, 0, 142],
    [70, 70, 70],
    [220, 220, 0],
    [107, 142, 35],
    [70, 130, 180],
    [0, 0, 0],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    pub color: [u8; 3],
}

/// Ordered class table. Index `i` is output channel `i` of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    entries: Vec<ClassEntry>,
    id_to_group: Option<Vec<u8>>,
}

/// On-disk layout of `class_mapping.json` as logged with the training run.
#[derive(Debug, Deserialize)]
struct ClassMappingDocument {
    #[serde(default, alias = "names")]
    group_names: Option<Vec<String>>,
    #[serde(default, alias = "colors")]
    group_colors: Option<Vec<[u8; 3]>>,
    #[serde(default)]
    id_to_group: Option<Vec<u8>>,
}

impl Default for ClassMapping {
    fn default() -> Self {
        Self::cityscapes()
    }
}

impl ClassMapping {
    pub fn new(entries: Vec<ClassEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(SegmentationError::configuration(
                "class mapping must contain at least one class",
            ));
        }
        // class ids are stored as u8 in the mask
        if entries.len() > usize::from(u8::MAX) + 1 {
            return Err(SegmentationError::configuration(format!(
                "class mapping has {} classes, at most 256 are supported",
                entries.len()
            )));
        }
        Ok(Self {
            entries,
            id_to_group: None,
        })
    }

    /// The eight Cityscapes groups with their display colors.
    pub fn cityscapes() -> Self {
        let entries = DEFAULT_CLASS_NAMES
            .iter()
            .zip(DEFAULT_CLASS_COLORS)
            .map(|(name, color)| ClassEntry {
                name: (*name).to_string(),
                color,
            })
            .collect();
        Self {
            entries,
            id_to_group: None,
        }
    }

    /// Parses a class-mapping document.
    ///
    /// Names and colors must either both be present (and of equal length) or both be
    /// absent, in which case the Cityscapes table is used. `id_to_group` is kept as-is.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let document: ClassMappingDocument = serde_json::from_slice(bytes)
            .map_err(|e| SegmentationError::load("class mapping parse", e))?;

        let mut mapping = match (document.group_names, document.group_colors) {
            (Some(names), Some(colors)) => {
                if names.len() != colors.len() {
                    return Err(SegmentationError::load(
                        "class mapping validation",
                        format!(
                            "{} class names but {} class colors",
                            names.len(),
                            colors.len()
                        ),
                    ));
                }
                let entries = names
                    .into_iter()
                    .zip(colors)
                    .map(|(name, color)| ClassEntry { name, color })
                    .collect();
                Self::new(entries)?
            }
            (None, None) => Self::cityscapes(),
            _ => {
                return Err(SegmentationError::load(
                    "class mapping validation",
                    "class names and colors must be provided together",
                ))
            }
        };

        if let Some(table) = &document.id_to_group {
            if let Some(bad) = table.iter().find(|&&g| usize::from(g) >= mapping.len()) {
                return Err(SegmentationError::load(
                    "class mapping validation",
                    format!(
                        "id_to_group references group {} but only {} classes exist",
                        bad,
                        mapping.len()
                    ),
                ));
            }
        }
        mapping.id_to_group = document.id_to_group;
        Ok(mapping)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClassEntry] {
        &self.entries
    }

    pub fn name(&self, class_id: usize) -> &str {
        self.entries
            .get(class_id)
            .map(|e| e.name.as_str())
            .unwrap_or_default()
    }

    /// Falls back to black for ids outside the table.
    pub fn color(&self, class_id: usize) -> [u8; 3] {
        self.entries
            .get(class_id)
            .map(|e| e.color)
            .unwrap_or([0, 0, 0])
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn colors(&self) -> Vec<[u8; 3]> {
        self.entries.iter().map(|e| e.color).collect()
    }

    /// Raw dataset label id to class group table, when the run logged one.
    pub fn id_to_group(&self) -> Option<&[u8]> {
        self.id_to_group.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cityscapes_table() {
        let mapping = ClassMapping::cityscapes();
        assert_eq!(mapping.len(), NUM_CLASSES);
        assert_eq!(mapping.name(5), "nature");
        assert_eq!(mapping.color(6), [70, 130, 180]);
        assert_eq!(mapping.names().len(), mapping.colors().len());
    }

    #[test]
    fn test_from_json_with_names_and_colors() -> Result<()> {
        let json = br#"{
            "group_names": ["road", "person", "car"],
            "group_colors": [[1, 2, 3], [4, 5, 6], [7, 8, 9]],
            "id_to_group": [0, 0, 1, 2, 2]
        }"#;
        let mapping = ClassMapping::from_json(json)?;
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.name(1), "person");
        assert_eq!(mapping.color(2), [7, 8, 9]);
        assert_eq!(mapping.id_to_group(), Some(&[0u8, 0, 1, 2, 2][..]));
        Ok(())
    }

    #[test]
    fn test_from_json_without_names_uses_cityscapes() -> Result<()> {
        let mapping = ClassMapping::from_json(br#"{"id_to_group": [7, 7, 0, 1]}"#)?;
        assert_eq!(mapping.len(), NUM_CLASSES);
        assert_eq!(mapping.name(0), "flat");
        assert_eq!(mapping.id_to_group().map(<[u8]>::len), Some(4));
        Ok(())
    }

    #[test]
    fn test_from_json_rejects_mismatched_lengths() {
        let json = br#"{"names": ["a", "b"], "colors": [[0, 0, 0]]}"#;
        assert!(matches!(
            ClassMapping::from_json(json),
            Err(SegmentationError::Load { .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_group_out_of_range() {
        let json = br#"{"id_to_group": [0, 8]}"#;
        assert!(ClassMapping::from_json(json).is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ClassMapping::from_json(b"not json").is_err());
    }

    #[test]
    fn test_out_of_range_lookups() {
        let mapping = ClassMapping::cityscapes();
        assert_eq!(mapping.name(42), "");
        assert_eq!(mapping.color(42), [0, 0, 0]);
    }
}
