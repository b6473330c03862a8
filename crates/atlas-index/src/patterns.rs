//! Pattern catalogue and structural pattern detection.
//!
//! The catalogue is a fixed set of named signatures matched against
//! extracted entities. Confidence values are tunable configuration, not
//! literals; deployments can override them per pattern name.

use std::collections::HashMap;

use atlas_config::ResolutionConfig;

use crate::graph::{FileKind, FileNode, PatternInfo, PatternKind};

/// Catalogue pattern names.
pub const SINGLETON: &str = "singleton";
pub const FACTORY: &str = "factory";
pub const OBSERVER: &str = "observer";
pub const INTERFACE_IMPLEMENTATION: &str = "interface-implementation";
pub const BARREL_MODULE: &str = "barrel-module";

/// Method names that mark a single-instance accessor.
const SINGLETON_ACCESSORS: &[&str] = &["instance", "getinstance", "shared", "defaultinstance"];

/// Method names that mark subscribe/notify behavior.
const OBSERVER_METHODS: &[&str] = &[
    "subscribe",
    "unsubscribe",
    "notify",
    "emit",
    "addlistener",
    "removelistener",
    "on",
];

/// Function name prefixes that mark factory construction.
const FACTORY_PREFIXES: &[&str] = &["create", "make", "build", "new_"];

/// Matches extracted entities against the pattern catalogue.
pub struct PatternDetector {
    confidences: HashMap<String, f32>,
}

impl PatternDetector {
    /// Build the detector with default confidences merged with config
    /// overrides.
    pub fn new(config: &ResolutionConfig) -> Self {
        let mut confidences: HashMap<String, f32> = [
            (SINGLETON, 0.7),
            (FACTORY, 0.6),
            (OBSERVER, 0.6),
            (INTERFACE_IMPLEMENTATION, 0.9),
            (BARREL_MODULE, 0.8),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        for (name, value) in &config.pattern_confidence {
            confidences.insert(name.clone(), value.clamp(0.0, 1.0));
        }

        Self { confidences }
    }

    /// Confidence for a catalogue pattern.
    pub fn confidence(&self, name: &str) -> f32 {
        self.confidences.get(name).copied().unwrap_or(0.5)
    }

    /// Detect single-file patterns on one node.
    pub fn detect_local(&self, node: &FileNode) -> Vec<PatternInfo> {
        let mut patterns = Vec::new();

        for class in &node.classes {
            if class
                .methods
                .iter()
                .any(|m| SINGLETON_ACCESSORS.contains(&canonical(&m.name).as_str()))
            {
                patterns.push(PatternInfo {
                    kind: PatternKind::Design,
                    name: SINGLETON.to_string(),
                    description: format!(
                        "{} exposes a single-instance accessor",
                        class.name
                    ),
                    category: "creational".to_string(),
                    confidence: self.confidence(SINGLETON),
                });
            }

            let observer_hits = class
                .methods
                .iter()
                .filter(|m| OBSERVER_METHODS.contains(&canonical(&m.name).as_str()))
                .count();
            if observer_hits >= 2 {
                patterns.push(PatternInfo {
                    kind: PatternKind::Design,
                    name: OBSERVER.to_string(),
                    description: format!(
                        "{} exposes subscribe/notify methods",
                        class.name
                    ),
                    category: "behavioral".to_string(),
                    confidence: self.confidence(OBSERVER),
                });
            }
        }

        let factory_fns: Vec<&str> = node
            .functions
            .iter()
            .filter(|f| {
                let lower = f.name.to_lowercase();
                FACTORY_PREFIXES.iter().any(|p| lower.starts_with(p))
                    && (f.return_type.is_some() || lower.len() > 6)
            })
            .map(|f| f.name.as_str())
            .collect();
        if !factory_fns.is_empty() {
            patterns.push(PatternInfo {
                kind: PatternKind::Design,
                name: FACTORY.to_string(),
                description: format!("factory functions: {}", factory_fns.join(", ")),
                category: "creational".to_string(),
                confidence: self.confidence(FACTORY),
            });
        }

        if node.kind == FileKind::Module
            && !node.exports.is_empty()
            && node.functions.is_empty()
            && node.classes.is_empty()
            && !node.imports.is_empty()
        {
            patterns.push(PatternInfo {
                kind: PatternKind::Architectural,
                name: BARREL_MODULE.to_string(),
                description: "module re-exports entities without declarations".to_string(),
                category: "module-organization".to_string(),
                confidence: self.confidence(BARREL_MODULE),
            });
        }

        patterns
    }

    /// Names of classes marked singleton on a node. Used by the resolver
    /// to flag direct construction elsewhere as a violation.
    pub fn singleton_classes<'n>(&self, node: &'n FileNode) -> Vec<&'n str> {
        node.classes
            .iter()
            .filter(|c| {
                c.methods
                    .iter()
                    .any(|m| SINGLETON_ACCESSORS.contains(&canonical(&m.name).as_str()))
            })
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Lowercase a method name and drop separators so `get_instance`,
/// `getInstance`, and `GetInstance` all compare equal.
fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_lowercase()
}
