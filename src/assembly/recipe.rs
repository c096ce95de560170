//! Assembly recipes and automatic recipe selection

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reads::ReadRegistry;

/// Which assembler runs, and in which mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Recipe {
    /// Unicycler when short reads are present, else Canu
    #[default]
    Auto,
    Unicycler,
    Canu,
    Spades,
    MetaSpades,
    PlasmidSpades,
    SingleCell,
}

impl Recipe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recipe::Auto => "auto",
            Recipe::Unicycler => "unicycler",
            Recipe::Canu => "canu",
            Recipe::Spades => "spades",
            Recipe::MetaSpades => "meta-spades",
            Recipe::PlasmidSpades => "plasmid-spades",
            Recipe::SingleCell => "single-cell",
        }
    }

    /// Recipes driven through spades.py
    pub fn is_spades(&self) -> bool {
        matches!(
            self,
            Recipe::Spades | Recipe::MetaSpades | Recipe::PlasmidSpades | Recipe::SingleCell
        )
    }

    /// Mode flag passed to spades.py
    pub fn spades_mode_flag(&self) -> Option<&'static str> {
        match self {
            Recipe::MetaSpades => Some("--meta"),
            Recipe::PlasmidSpades => Some("--plasmid"),
            Recipe::SingleCell => Some("--sc"),
            _ => None,
        }
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve `auto` against the live read sets. Explicit recipes pass through.
pub fn select_recipe(requested: Recipe, registry: &ReadRegistry) -> Recipe {
    match requested {
        Recipe::Auto if registry.has_live_short_reads() => Recipe::Unicycler,
        Recipe::Auto => Recipe::Canu,
        explicit => explicit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_recipe_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ReadRegistry::new(dir.path());
        assert_eq!(select_recipe(Recipe::MetaSpades, &registry), Recipe::MetaSpades);
        assert_eq!(select_recipe(Recipe::Auto, &registry), Recipe::Canu);
    }

    #[test]
    fn test_spades_family() {
        assert!(Recipe::SingleCell.is_spades());
        assert!(!Recipe::Canu.is_spades());
        assert_eq!(Recipe::PlasmidSpades.spades_mode_flag(), Some("--plasmid"));
        assert_eq!(Recipe::Spades.spades_mode_flag(), None);
    }
}
