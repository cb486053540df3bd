//! The chat model seam.
//!
//! Stages talk to models only through [`LanguageModel`], so tests can drive
//! the whole pipeline with scripted models and no network.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::ChatClient;

/// Boxed future returned by [`LanguageModel`] methods.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Reply fragments in arrival order. An `Err` item is a mid-stream failure;
/// the stream ends after it.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

pub trait LanguageModel: Send + Sync {
    /// Display name, used in reply headers.
    fn name(&self) -> &str;

    /// Complete `prompt` and return the whole reply.
    fn invoke<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, String>;

    /// Complete `prompt` as a stream of fragments.
    fn stream<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, FragmentStream>;
}

impl LanguageModel for ChatClient {
    fn name(&self) -> &str {
        self.model()
    }

    fn invoke<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, String> {
        Box::pin(self.complete(prompt))
    }

    fn stream<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, FragmentStream> {
        Box::pin(self.complete_stream(prompt))
    }
}
