// Language Table
// Default entrypoints and command templates for each supported language

use std::path::Path;

/// Placeholder replaced by the absolute entrypoint path
pub const ENTRYPOINT: &str = "{entrypoint}";
/// Placeholder replaced by the absolute path of the compiled artifact
pub const ARTIFACT: &str = "{artifact}";
/// Placeholder replaced by the entrypoint file name without extension
pub const STEM: &str = "{stem}";
/// Placeholder replaced by the absolute `code/` directory
pub const CODE: &str = "{code_dir}";

/// How a language's entrypoint is turned into a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run the entrypoint through an interpreter
    Interpreted { run: Vec<String> },
    /// Build an artifact first, then run it
    Compiled {
        compile: Vec<String>,
        run: Vec<String>,
    },
    /// Run the entrypoint itself
    Executable,
}

/// A registered language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageRunner {
    /// Canonical tag (lowercase)
    pub tag: String,
    /// Alternative tags accepted for this language
    pub aliases: Vec<String>,
    /// Entrypoint used when the job names none, relative to `code/`
    pub default_entrypoint: String,
    pub invocation: Invocation,
}

impl LanguageRunner {
    /// Language run through an interpreter: `argv... <entrypoint>`
    pub fn interpreted(tag: &str, default_entrypoint: &str, program: &[&str]) -> Self {
        let mut run: Vec<String> = program.iter().map(|s| s.to_string()).collect();
        run.push(ENTRYPOINT.to_string());
        Self {
            tag: tag.to_ascii_lowercase(),
            aliases: Vec::new(),
            default_entrypoint: default_entrypoint.to_string(),
            invocation: Invocation::Interpreted { run },
        }
    }

    /// Language compiled into `{artifact}` before running
    pub fn compiled(tag: &str, default_entrypoint: &str, compile: &[&str], run: &[&str]) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            aliases: Vec::new(),
            default_entrypoint: default_entrypoint.to_string(),
            invocation: Invocation::Compiled {
                compile: compile.iter().map(|s| s.to_string()).collect(),
                run: run.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases
            .extend(aliases.iter().map(|a| a.to_ascii_lowercase()));
        self
    }

    /// Whether `tag` names this language (case-insensitive)
    pub fn matches(&self, tag: &str) -> bool {
        let tag = tag.trim().to_ascii_lowercase();
        self.tag == tag || self.aliases.iter().any(|a| *a == tag)
    }
}

/// Values substituted into command templates
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub entrypoint: &'a Path,
    pub artifact: &'a Path,
    pub code_dir: &'a Path,
}

impl TemplateContext<'_> {
    /// Expand every placeholder in `template`
    pub fn render(&self, template: &[String]) -> Vec<String> {
        let stem = self
            .entrypoint
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entrypoint = self.entrypoint.to_string_lossy();
        let artifact = self.artifact.to_string_lossy();
        let code_dir = self.code_dir.to_string_lossy();

        template
            .iter()
            .map(|arg| {
                arg.replace(ENTRYPOINT, &entrypoint)
                    .replace(ARTIFACT, &artifact)
                    .replace(STEM, &stem)
                    .replace(CODE, &code_dir)
            })
            .collect()
    }
}

/// Languages available out of the box
pub fn builtin_languages() -> Vec<LanguageRunner> {
    vec![
        LanguageRunner::interpreted("python", "main.py", &["python3"])
            .with_aliases(&["py", "python3"]),
        LanguageRunner::interpreted("bash", "run.sh", &["bash"]).with_aliases(&["shell"]),
        LanguageRunner::interpreted("sh", "run.sh", &["sh"]),
        LanguageRunner::interpreted("node", "index.js", &["node"])
            .with_aliases(&["js", "javascript", "nodejs"]),
        LanguageRunner::interpreted("ruby", "main.rb", &["ruby"]).with_aliases(&["rb"]),
        LanguageRunner::interpreted("r", "main.R", &["Rscript"]).with_aliases(&["rscript"]),
        LanguageRunner::interpreted("julia", "main.jl", &["julia"]).with_aliases(&["jl"]),
        LanguageRunner::interpreted("perl", "main.pl", &["perl"]).with_aliases(&["pl"]),
        LanguageRunner::compiled(
            "go",
            "main.go",
            &["go", "build", "-o", ARTIFACT, ENTRYPOINT],
            &[ARTIFACT],
        )
        .with_aliases(&["golang"]),
        LanguageRunner::compiled(
            "rust",
            "main.rs",
            &["rustc", "-O", "-o", ARTIFACT, ENTRYPOINT],
            &[ARTIFACT],
        )
        .with_aliases(&["rs"]),
        LanguageRunner::compiled(
            "c",
            "main.c",
            &["cc", "-O2", "-o", ARTIFACT, ENTRYPOINT],
            &[ARTIFACT],
        ),
        LanguageRunner::compiled(
            "cpp",
            "main.cpp",
            &["c++", "-O2", "-o", ARTIFACT, ENTRYPOINT],
            &[ARTIFACT],
        )
        .with_aliases(&["c++", "cxx"]),
        LanguageRunner::compiled(
            "java",
            "Main.java",
            &["javac", "-d", CODE, ENTRYPOINT],
            &["java", "-cp", CODE, STEM],
        ),
    ]
}
