//! Build/run dispatcher.
//!
//! Resolves the recipe, materializes the workspace, turns the recipe's
//! toolchain into at most one build step plus one run step, and runs them
//! under a single deadline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use super::{ExecutionRequest, ExecutionResponse, Executor};
use crate::config::ExecutionSettings;
use crate::error::ExecError;
use crate::registry::{substitute_args, LanguageRecipe, Registry, Toolchain};
use crate::runner::{Deadline, ProcessRunner, Step};
use crate::workspace::Workspace;

/// The steps derived from a recipe for one workspace.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Compile or syntax-check step; `None` when the build is skipped.
    pub build: Option<Step>,
    pub run: Step,
}

impl Plan {
    /// Derive the steps for `toolchain`, given the workspace root and the
    /// absolute source path inside it.
    ///
    /// Every step gets its own process group, so stray children of a
    /// compiler or interpreter are killed along with the program.
    pub fn new(toolchain: &Toolchain, root: &Path, source: &Path) -> Self {
        let source_arg = source.to_string_lossy().into_owned();
        let step = |program: PathBuf, args: Vec<String>| Step {
            program,
            args,
            working_dir: root.to_path_buf(),
            new_process_group: true,
        };

        match toolchain {
            Toolchain::InterpretOnly {
                interpreter,
                check_args,
            } => Self {
                build: (!check_args.is_empty()).then(|| {
                    step(
                        PathBuf::from(interpreter),
                        substitute_args(check_args, &source_arg),
                    )
                }),
                run: step(PathBuf::from(interpreter), vec![source_arg.clone()]),
            },
            Toolchain::CompileThenRunArtifact {
                compiler,
                build_args,
                artifact,
            } => Self {
                build: Some(step(
                    PathBuf::from(compiler),
                    with_source(&source_arg, build_args),
                )),
                run: step(root.join(artifact), Vec::new()),
            },
            Toolchain::CompileThenRunNamedEntry {
                compiler,
                build_args,
                run_command,
                entry,
            } => Self {
                build: Some(step(
                    PathBuf::from(compiler),
                    with_source(&source_arg, build_args),
                )),
                run: step(PathBuf::from(run_command), vec![entry.clone()]),
            },
        }
    }
}

/// Source path followed by the substituted template.
fn with_source(source: &str, template: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(template.len() + 1);
    args.push(source.to_string());
    args.extend(substitute_args(template, source));
    args
}

/// The execution engine: registry lookup, workspace lifecycle, build, run.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    runner: ProcessRunner,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, settings: &ExecutionSettings) -> Self {
        Self {
            registry,
            runner: ProcessRunner::new(settings.max_output_bytes),
            workspace_root: settings.workspace_root.clone(),
            timeout: settings.timeout(),
        }
    }

    /// Run one request to a terminal state.
    ///
    /// The workspace is released before returning on every path; if this
    /// future is dropped or panics, the workspace's `Drop` removes it.
    #[instrument(
        skip(self, request),
        fields(language = %request.language, code_len = request.code.len())
    )]
    pub async fn run(&self, request: &ExecutionRequest) -> Result<Vec<u8>, ExecError> {
        let recipe = self
            .registry
            .resolve(&request.language)
            .ok_or_else(|| ExecError::UnsupportedLanguage(request.language.clone()))?;

        let deadline = Deadline::after(self.timeout);

        let workspace = Workspace::acquire(&self.workspace_root).map_err(|e| {
            error!(root = %self.workspace_root.display(), error = %e, "Failed to create workspace");
            ExecError::WorkspaceCreate(e)
        })?;

        let result = self
            .build_and_run(&workspace, recipe, &request.code, deadline)
            .await;
        workspace.release();
        result
    }

    async fn build_and_run(
        &self,
        workspace: &Workspace,
        recipe: &LanguageRecipe,
        code: &str,
        deadline: Deadline,
    ) -> Result<Vec<u8>, ExecError> {
        let source = workspace.write_source(recipe, code).await.map_err(|e| {
            error!(path = %workspace.path().display(), error = %e, "Failed to write source");
            ExecError::SourceWrite(e)
        })?;

        let plan = Plan::new(&recipe.toolchain, workspace.path(), &source);
        debug!(
            shape = recipe.toolchain.shape(),
            build = plan.build.is_some(),
            "Planned execution"
        );

        if let Some(build) = &plan.build {
            self.runner
                .run(build, deadline)
                .await
                .map_err(ExecError::Build)?;
            debug!(
                remaining_secs = deadline.remaining().as_secs_f64(),
                "Build succeeded"
            );
        }

        self.runner
            .run(&plan.run, deadline)
            .await
            .map_err(ExecError::Run)
    }
}

#[async_trait]
impl Executor for Engine {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResponse {
        let started = Instant::now();
        let result = self.run(request).await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(output) => info!(
                language = %request.language,
                state = "succeeded",
                output_len = output.len(),
                elapsed_ms,
                "Execution finished"
            ),
            Err(e) if e.is_infrastructure() => error!(
                language = %request.language,
                state = e.state(),
                error = %e,
                elapsed_ms,
                "Execution failed"
            ),
            Err(e) => info!(
                language = %request.language,
                state = e.state(),
                output_len = e.captured_output().map_or(0, <[u8]>::len),
                elapsed_ms,
                "Execution finished"
            ),
        }

        ExecutionResponse::from(result)
    }

    fn languages(&self) -> Vec<String> {
        self.registry.languages()
    }
}
