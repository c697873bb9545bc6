//! Language registry.
//!
//! Maps a language identifier to the recipe that knows how to build and run
//! it. The registry is built once at startup and only read afterwards.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

/// Placeholder in argument templates that is replaced with the source path.
pub const SOURCE_PLACEHOLDER: &str = "{}";

/// Toolchain description for one language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageRecipe {
    /// Filename the source is written under (e.g. `Main.java`).
    pub source_filename: String,

    /// How the source is turned into a running program.
    pub toolchain: Toolchain,
}

/// The closed set of build/run shapes the dispatcher understands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Toolchain {
    /// Run the source directly with an interpreter.
    ///
    /// A non-empty `check_args` adds a syntax-check step before running.
    InterpretOnly {
        interpreter: String,
        #[serde(default)]
        check_args: Vec<String>,
    },

    /// Compile to a binary inside the workspace, then run that binary.
    CompileThenRunArtifact {
        compiler: String,
        #[serde(default)]
        build_args: Vec<String>,
        /// Workspace-relative path of the produced binary.
        artifact: String,
    },

    /// Compile into the workspace, then run a named entry point
    /// (class-based languages).
    CompileThenRunNamedEntry {
        compiler: String,
        #[serde(default)]
        build_args: Vec<String>,
        run_command: String,
        entry: String,
    },
}

impl Toolchain {
    /// Short name of the shape, for logging.
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::InterpretOnly { .. } => "interpret_only",
            Self::CompileThenRunArtifact { .. } => "compile_then_run_artifact",
            Self::CompileThenRunNamedEntry { .. } => "compile_then_run_named_entry",
        }
    }
}

/// Substitute the source-path placeholder in every template argument.
pub fn substitute_args(template: &[String], source_path: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source_path))
        .collect()
}

/// Immutable mapping from language identifier to recipe.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    recipes: HashMap<String, LanguageRecipe>,
}

impl Registry {
    /// Build a registry from an explicit recipe table.
    pub const fn new(recipes: HashMap<String, LanguageRecipe>) -> Self {
        Self { recipes }
    }

    /// The four languages supported out of the box.
    pub fn builtin() -> Self {
        let mut recipes = HashMap::new();
        recipes.insert(
            "python".to_string(),
            LanguageRecipe {
                source_filename: "main.py".to_string(),
                toolchain: Toolchain::InterpretOnly {
                    interpreter: "python3".to_string(),
                    check_args: Vec::new(),
                },
            },
        );
        // `node --check` runs first, so JS syntax errors surface as
        // "Compilation error:" rather than failing at run time.
        recipes.insert(
            "javascript".to_string(),
            LanguageRecipe {
                source_filename: "main.js".to_string(),
                toolchain: Toolchain::InterpretOnly {
                    interpreter: "node".to_string(),
                    check_args: vec!["--check".to_string(), SOURCE_PLACEHOLDER.to_string()],
                },
            },
        );
        recipes.insert(
            "cpp".to_string(),
            LanguageRecipe {
                source_filename: "main.cpp".to_string(),
                toolchain: Toolchain::CompileThenRunArtifact {
                    compiler: "g++".to_string(),
                    build_args: vec!["-o".to_string(), "a.out".to_string()],
                    artifact: "a.out".to_string(),
                },
            },
        );
        recipes.insert(
            "java".to_string(),
            LanguageRecipe {
                // Java requires the file name to match the public class
                source_filename: "Main.java".to_string(),
                toolchain: Toolchain::CompileThenRunNamedEntry {
                    compiler: "javac".to_string(),
                    build_args: Vec::new(),
                    run_command: "java".to_string(),
                    entry: "Main".to_string(),
                },
            },
        );
        Self { recipes }
    }

    /// Look up the recipe for a language identifier (exact match).
    pub fn resolve(&self, language: &str) -> Option<&LanguageRecipe> {
        self.recipes.get(language)
    }

    /// Supported language identifiers, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.recipes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Merge extra recipes into the registry.
    ///
    /// Custom recipes override built-in ones on name collision (with info log).
    pub fn merge(&mut self, extra: HashMap<String, LanguageRecipe>) {
        for (name, recipe) in extra {
            if self.recipes.contains_key(&name) {
                info!(language = %name, "Custom recipe overrides built-in language");
            }
            self.recipes.insert(name, recipe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_languages() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.languages(),
            vec!["cpp", "java", "javascript", "python"]
        );
    }

    #[test]
    fn resolve_unknown_is_none() {
        let registry = Registry::builtin();
        assert!(registry.resolve("unknown").is_none());
        // Lookup is exact, not case-insensitive
        assert!(registry.resolve("Python").is_none());
    }

    #[test]
    fn java_runs_named_entry() {
        let registry = Registry::builtin();
        let java = registry.resolve("java").unwrap();
        assert_eq!(java.source_filename, "Main.java");
        match &java.toolchain {
            Toolchain::CompileThenRunNamedEntry {
                run_command, entry, ..
            } => {
                assert_eq!(run_command, "java");
                assert_eq!(entry, "Main");
            }
            other => panic!("unexpected toolchain: {other:?}"),
        }
    }

    #[test]
    fn substitute_replaces_every_placeholder() {
        let template = vec![
            "-c".to_string(),
            "import py_compile; py_compile.compile('{}')".to_string(),
            "{}:{}".to_string(),
        ];
        let args = substitute_args(&template, "/w/main.py");
        assert_eq!(args[0], "-c");
        assert_eq!(args[1], "import py_compile; py_compile.compile('/w/main.py')");
        assert_eq!(args[2], "/w/main.py:/w/main.py");
    }

    #[test]
    fn deserialize_recipe() {
        let json = r#"{
            "source_filename": "main.rb",
            "toolchain": { "kind": "interpret_only", "interpreter": "ruby" }
        }"#;
        let recipe: LanguageRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(
            recipe.toolchain,
            Toolchain::InterpretOnly {
                interpreter: "ruby".to_string(),
                check_args: Vec::new(),
            }
        );
        assert_eq!(recipe.toolchain.shape(), "interpret_only");
    }

    #[test]
    fn merge_overrides_and_adds() {
        let mut registry = Registry::builtin();
        let custom = LanguageRecipe {
            source_filename: "main.py".to_string(),
            toolchain: Toolchain::InterpretOnly {
                interpreter: "/opt/python/bin/python3".to_string(),
                check_args: Vec::new(),
            },
        };
        let ruby = LanguageRecipe {
            source_filename: "main.rb".to_string(),
            toolchain: Toolchain::InterpretOnly {
                interpreter: "ruby".to_string(),
                check_args: Vec::new(),
            },
        };
        registry.merge(HashMap::from([
            ("python".to_string(), custom.clone()),
            ("ruby".to_string(), ruby),
        ]));

        assert_eq!(registry.languages().len(), 5);
        assert_eq!(registry.resolve("python"), Some(&custom));
        assert!(registry.resolve("ruby").is_some());
    }
}
