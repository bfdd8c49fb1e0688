//! Recording stand-in for [`CommandRunner`] used by unit tests.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, Invocation, StageResult};
use crate::toolchain::{ResolveStrategy, ToolSpec, ToolchainHandle};

type Handler = Box<dyn Fn(&Invocation) -> Option<StageResult> + Send + Sync>;

/// Resolves every tool to `/fake/<name>` and succeeds at every invocation.
///
/// Invocations with a `-o <path>` pair behave like glslc: the output file is
/// written with bytes derived from the input. A handler installed with
/// [`FakeRunner::on_invoke`] can override the result per invocation.
pub struct FakeRunner {
    missing: HashSet<String>,
    handler: Option<Handler>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            missing: HashSet::new(),
            handler: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_tool(mut self, name: &str) -> Self {
        self.missing.insert(name.to_string());
        self
    }

    pub fn on_invoke<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Invocation) -> Option<StageResult> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.invocations().iter().map(Invocation::program_name).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn label(&self) -> &'static str {
        "fake"
    }

    fn resolve(&self, spec: &ToolSpec) -> Result<ToolchainHandle> {
        if self.missing.contains(&spec.name) {
            return Err(PipelineError::ToolchainNotFound {
                name: spec.name.clone(),
                candidates_tried: spec.fallbacks.clone(),
            });
        }
        Ok(ToolchainHandle::new(
            &spec.name,
            PathBuf::from("/fake").join(&spec.name),
            ResolveStrategy::SearchPath,
        ))
    }

    fn invoke(&self, invocation: &Invocation) -> Result<StageResult> {
        self.calls.lock().unwrap().push(invocation.clone());

        if let Some(result) = self.handler.as_ref().and_then(|h| h(invocation)) {
            return Ok(result);
        }

        let args = invocation.arg_strings();
        if let Some(pos) = args.iter().position(|a| a == "-o") {
            let output = PathBuf::from(&args[pos + 1]);
            let input = PathBuf::from(&args[pos - 1]);
            let mut bytes = b"SPIRV:".to_vec();
            bytes.extend(fs::read(&input).unwrap_or_default());
            fs::write(&output, bytes).expect("fake glslc output");
        }

        Ok(StageResult {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        })
    }
}
