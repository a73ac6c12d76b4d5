//! Built-in model catalog
//!
//! The list of installable models is compiled into the binary and never
//! mutated at runtime; everything the CLI layer shows for a model comes
//! from its [`ModelDefinition`].

use serde::Serialize;

/// Immutable catalog entry describing one installable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDefinition {
    /// Stable slug used as the key in every persisted document
    pub id: &'static str,
    pub display_name: &'static str,
    /// Remote registry identifier, e.g. "org/name"
    pub hub_repository: &'static str,
    /// Human-readable parameter count, e.g. "4B"
    pub parameter_label: &'static str,
    /// Directory inside the downloaded snapshot holding the actual
    /// weights and config, when the repository nests them
    pub subdirectory: Option<&'static str>,
    /// Hint for the CLI layer's default selection
    pub recommended: bool,
}

/// Every model the manager knows how to install
pub const CATALOG: &[ModelDefinition] = &[
    ModelDefinition {
        id: "qwen3-1.7b",
        display_name: "Qwen3 1.7B",
        hub_repository: "mlx-community/Qwen3-1.7B-4bit",
        parameter_label: "1.7B",
        subdirectory: None,
        recommended: false,
    },
    ModelDefinition {
        id: "qwen3-4b",
        display_name: "Qwen3 4B",
        hub_repository: "mlx-community/Qwen3-4B-4bit",
        parameter_label: "4B",
        subdirectory: None,
        recommended: true,
    },
    ModelDefinition {
        id: "llama-3.2-3b",
        display_name: "Llama 3.2 3B Instruct",
        hub_repository: "mlx-community/Llama-3.2-3B-Instruct-4bit",
        parameter_label: "3B",
        subdirectory: None,
        recommended: false,
    },
    ModelDefinition {
        id: "gemma-3-4b",
        display_name: "Gemma 3 4B Instruct",
        hub_repository: "mlx-community/gemma-3-4b-it-4bit",
        parameter_label: "4B",
        subdirectory: None,
        recommended: false,
    },
];

/// Look up a catalog entry by id
pub fn find_model(id: &str) -> Option<&'static ModelDefinition> {
    CATALOG.iter().find(|m| m.id == id)
}

/// The catalog's default choice for UIs (first recommended entry,
/// falling back to the first entry)
pub fn recommended_model() -> &'static ModelDefinition {
    CATALOG
        .iter()
        .find(|m| m.recommended)
        .unwrap_or(&CATALOG[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_model() {
        let model = find_model("qwen3-4b").unwrap();
        assert_eq!(model.hub_repository, "mlx-community/Qwen3-4B-4bit");
        assert_eq!(model.parameter_label, "4B");
    }

    #[test]
    fn test_find_model_unknown() {
        assert!(find_model("no-such-model").is_none());
    }

    #[test]
    fn test_catalog_ids_unique() {
        let mut ids: Vec<_> = CATALOG.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn test_recommended_model() {
        assert_eq!(recommended_model().id, "qwen3-4b");
    }

    #[test]
    fn test_repositories_are_org_name() {
        for model in CATALOG {
            assert_eq!(
                model.hub_repository.matches('/').count(),
                1,
                "bad repository id: {}",
                model.hub_repository
            );
        }
    }
}
