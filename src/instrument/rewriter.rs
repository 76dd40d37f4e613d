use super::class_image::{ClassImage, Op};
use super::config::InstrumentConfig;
use super::error::IllegalClassFormat;
use super::{Class, LoaderId};
use crate::core::types::LockEventType;

/// Everything a rewriter is told about the class it is asked to transform
#[derive(Debug, Clone, Copy)]
pub struct RewriteRequest<'a> {
    /// Loader that will define the result
    pub loader: LoaderId,
    pub class_name: &'a str,
    /// Where the original bytes came from, if the source knows
    pub code_source: Option<&'a str>,
    /// The already-loaded class being re-transformed, for explicit transforms
    pub existing: Option<&'a Class>,
    pub bytes: &'a [u8],
}

/// Rewrites the executable form of a class
///
/// `Ok(None)` declines the transformation. Declining is deterministic: the
/// same input is declined every time, so callers never retry.
///
/// The loader holds no lock while the rewriter runs, so a rewriter may
/// resolve other classes through the loader that called it. Under contention
/// the same class can be rewritten more than once; only one result is
/// defined.
pub trait Rewriter: Send + Sync {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Option<Vec<u8>>, IllegalClassFormat>;
}

impl<F> Rewriter for F
where
    F: Fn(&RewriteRequest<'_>) -> Result<Option<Vec<u8>>, IllegalClassFormat> + Send + Sync,
{
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Option<Vec<u8>>, IllegalClassFormat> {
        self(request)
    }
}

/// Injects lock-event hooks around every monitor operation
///
/// An `Acquire` hook is placed right after each `MonitorEnter` and a
/// `Release` hook right before each `MonitorExit`. Classes in a protected
/// namespace, classes without monitor operations and classes that already
/// carry hooks are declined.
#[derive(Debug, Clone, Default)]
pub struct MonitorRewriter {
    config: InstrumentConfig,
}

impl MonitorRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the protected namespaces of `config`
    pub fn with_config(config: InstrumentConfig) -> Self {
        MonitorRewriter { config }
    }
}

fn inject_hooks(code: &[Op]) -> Vec<Op> {
    let mut out = Vec::with_capacity(code.len() * 2);
    for op in code {
        match op {
            Op::MonitorEnter(reference) => {
                out.push(op.clone());
                out.push(Op::LockHook {
                    event: LockEventType::Acquire,
                    reference: reference.clone(),
                });
            }
            Op::MonitorExit(reference) => {
                out.push(Op::LockHook {
                    event: LockEventType::Release,
                    reference: reference.clone(),
                });
                out.push(op.clone());
            }
            _ => out.push(op.clone()),
        }
    }
    out
}

impl Rewriter for MonitorRewriter {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Option<Vec<u8>>, IllegalClassFormat> {
        if self.config.is_protected(request.class_name) {
            return Ok(None);
        }

        let mut image = ClassImage::decode(request.bytes)?;
        if image.instrumented || !image.has_monitor_ops() {
            return Ok(None);
        }

        for method in &mut image.methods {
            method.code = inject_hooks(&method.code);
        }
        image.instrumented = true;
        image.encode().map(Some)
    }
}
