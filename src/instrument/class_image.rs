//! Executable form handled by the loader
//!
//! A class is a named set of methods, each a flat list of [`Op`]s. The
//! serialized form is MessagePack with a magic number up front, so garbage
//! bytes are rejected at decode time rather than at use.

use super::error::IllegalClassFormat;
use crate::core::types::LockEventType;
use serde::{Deserialize, Serialize};

/// Marks an encoded class image
pub const CLASS_MAGIC: u32 = 0x4C4B_4344;

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Acquire the monitor named by the reference
    MonitorEnter(String),
    /// Release the monitor named by the reference
    MonitorExit(String),
    /// Report a lock transition to the event emitter
    LockHook {
        event: LockEventType,
        reference: String,
    },
    /// Call another method
    Invoke(String),
    Nop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassImage {
    pub magic: u32,
    pub name: String,
    /// Set by the rewriter once lock hooks have been injected
    pub instrumented: bool,
    pub methods: Vec<Method>,
}

impl ClassImage {
    pub fn new(name: impl Into<String>) -> Self {
        ClassImage {
            magic: CLASS_MAGIC,
            name: name.into(),
            instrumented: false,
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, name: impl Into<String>, code: Vec<Op>) -> Self {
        self.methods.push(Method {
            name: name.into(),
            code,
        });
        self
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Whether any method enters or exits a monitor
    pub fn has_monitor_ops(&self) -> bool {
        self.methods.iter().flat_map(|m| &m.code).any(|op| {
            matches!(op, Op::MonitorEnter(_) | Op::MonitorExit(_))
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, IllegalClassFormat> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IllegalClassFormat> {
        let image: ClassImage = rmp_serde::from_slice(bytes)?;
        if image.magic != CLASS_MAGIC {
            return Err(IllegalClassFormat(format!(
                "bad magic {:#010x}",
                image.magic
            )));
        }
        Ok(image)
    }

    /// Structural check run on rewritten classes
    ///
    /// Monitors must be balanced and properly nested within each method, an
    /// `Acquire` hook must directly follow the `MonitorEnter` it reports, and
    /// a `Release` hook must directly precede its `MonitorExit`.
    pub fn verify(&self) -> Result<(), IllegalClassFormat> {
        if self.name.is_empty() {
            return Err(IllegalClassFormat::new("empty class name"));
        }
        for method in &self.methods {
            verify_method(&self.name, method)?;
        }
        Ok(())
    }
}

fn verify_method(class: &str, method: &Method) -> Result<(), IllegalClassFormat> {
    let code = &method.code;
    let mut held: Vec<&str> = Vec::new();
    let fail = |reason: String| IllegalClassFormat(format!("{class}.{}: {reason}", method.name));

    for (index, op) in code.iter().enumerate() {
        match op {
            Op::MonitorEnter(reference) => held.push(reference),
            Op::MonitorExit(reference) => match held.pop() {
                Some(top) if top == reference => {}
                Some(top) => {
                    return Err(fail(format!(
                        "exit of {reference} at {index} while {top} is innermost"
                    )));
                }
                None => return Err(fail(format!("exit of unheld {reference} at {index}"))),
            },
            Op::LockHook {
                event: LockEventType::Acquire,
                reference,
            } => {
                let entered = index
                    .checked_sub(1)
                    .and_then(|prev| code.get(prev))
                    .is_some_and(|prev| matches!(prev, Op::MonitorEnter(r) if r == reference));
                if !entered {
                    return Err(fail(format!(
                        "acquire hook for {reference} at {index} does not follow its enter"
                    )));
                }
            }
            Op::LockHook {
                event: LockEventType::Release,
                reference,
            } => {
                let exits = code
                    .get(index + 1)
                    .is_some_and(|next| matches!(next, Op::MonitorExit(r) if r == reference));
                if !exits {
                    return Err(fail(format!(
                        "release hook for {reference} at {index} does not precede its exit"
                    )));
                }
            }
            Op::Invoke(_) | Op::Nop => {}
        }
    }

    match held.last() {
        Some(reference) => Err(fail(format!("{reference} still held at return"))),
        None => Ok(()),
    }
}
