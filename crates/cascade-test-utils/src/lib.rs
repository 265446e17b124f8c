//! Scripted backends for exercising the invocation layer without a provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cascade_llm::{BackendDescriptor, BackendFactory, GenerateRequest, LlmBackend, LlmError, ModelChain};
use secrecy::SecretString;

/// One scripted reaction to a `generate` call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// HTTP 503 "model is overloaded".
    Overloaded,
    /// Failure with no usable status code, classified by its text alone.
    Message(String),
    /// HTTP 400 "invalid argument".
    InvalidArgument,
    /// Sleep, then behave like the inner step.
    Slow(Duration, Box<Step>),
}

impl Step {
    pub fn reply(text: impl Into<String>) -> Self {
        Step::Reply(text.into())
    }
}

/// Backend that walks through a script, repeating the last step forever.
pub struct ScriptedBackend {
    id: String,
    steps: Mutex<Vec<Step>>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Arc<Self> {
        assert!(!steps.is_empty(), "script needs at least one step");
        Arc::new(Self {
            id: id.into(),
            steps: Mutex::new(steps),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(id: impl Into<String>, step: Step) -> Arc<Self> {
        Self::new(id, vec![step])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let steps = self.steps.lock().unwrap();
        steps.get(n).or_else(|| steps.last()).cloned().unwrap()
    }
}

async fn play(mut step: Step) -> Result<String, LlmError> {
    while let Step::Slow(delay, inner) = step {
        tokio::time::sleep(delay).await;
        step = *inner;
    }
    match step {
        Step::Reply(text) => Ok(text),
        Step::Overloaded => Err(LlmError::Api { status: 503, message: "The model is overloaded.".into() }),
        Step::Message(message) => Err(LlmError::Api { status: 0, message }),
        Step::InvalidArgument => Err(LlmError::Api {
            status: 400,
            message: "Request contains an invalid argument.".into(),
        }),
        Step::Slow(..) => unreachable!(),
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, req: GenerateRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(req.prompt);
        let step = self.next_step();
        play(step).await
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Factory handing out pre-registered scripted backends by identifier.
/// Unknown identifiers get a backend that always replies "OK".
#[derive(Default)]
pub struct ScriptedFactory {
    backends: HashMap<String, Arc<ScriptedBackend>>,
    built: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub fn new(backends: impl IntoIterator<Item = Arc<ScriptedBackend>>) -> Self {
        Self {
            backends: backends.into_iter().map(|b| (b.id.clone(), b)).collect(),
            built: Mutex::new(Vec::new()),
        }
    }

    /// Identifiers passed to `build`, in call order.
    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

impl BackendFactory for ScriptedFactory {
    fn build(&self, identifier: &str, _credential: &SecretString) -> Arc<dyn LlmBackend> {
        self.built.lock().unwrap().push(identifier.to_string());
        match self.backends.get(identifier) {
            Some(b) => b.clone(),
            None => ScriptedBackend::always(identifier, Step::reply("OK")),
        }
    }
}

/// Chain over the given backends, primary first.
pub fn scripted_chain(backends: &[Arc<ScriptedBackend>]) -> ModelChain {
    let descriptors = backends
        .iter()
        .map(|b| BackendDescriptor {
            identifier: b.id.clone(),
            tier: 0,
            handle: b.clone() as Arc<dyn LlmBackend>,
        })
        .collect();
    ModelChain::from_backends(descriptors).unwrap()
}

pub fn test_credential() -> SecretString {
    SecretString::from("test-key".to_string())
}
