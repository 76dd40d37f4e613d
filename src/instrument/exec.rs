//! Execution of loaded classes
//!
//! A [`Heap`] binds the references used by method bodies to live objects.
//! Running a method enters and exits the monitor of each bound object as the
//! code says, and each `LockHook` becomes a call to
//! [`EventEmitter::record`]. A class that was never rewritten runs with the
//! same locking but reports nothing.
//!
//! Monitors are reentrant per thread, so a method may enter a monitor its
//! caller already holds.

use super::Class;
use super::class_image::Op;
use super::error::ExecError;
use crate::core::emitter::{EventEmitter, LockObject};
use fxhash::FxHashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::any::{Any, type_name};
use std::sync::Arc;

/// Deepest chain of `Invoke`s a run may build
pub const MAX_CALL_DEPTH: usize = 64;

struct Bound {
    object: Arc<LockObject>,
    class_name: &'static str,
    monitor: Arc<ReentrantMutex<()>>,
}

/// Objects a method body refers to by name
#[derive(Default)]
pub struct Heap {
    objects: FxHashMap<String, Bound>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `reference` to `object`
    ///
    /// References bound to the same object share its monitor.
    pub fn bind<T: Any + Send + Sync>(&mut self, reference: impl Into<String>, object: &Arc<T>) {
        let object: Arc<LockObject> = object.clone();
        let monitor = self
            .objects
            .values()
            .find(|bound| std::ptr::addr_eq(Arc::as_ptr(&bound.object), Arc::as_ptr(&object)))
            .map(|bound| Arc::clone(&bound.monitor))
            .unwrap_or_else(|| Arc::new(ReentrantMutex::new(())));

        self.objects.insert(
            reference.into(),
            Bound {
                object,
                class_name: type_name::<T>(),
                monitor,
            },
        );
    }

    pub fn with<T: Any + Send + Sync>(mut self, reference: impl Into<String>, object: &Arc<T>) -> Self {
        self.bind(reference, object);
        self
    }

    fn lookup(&self, reference: &str) -> Result<&Bound, ExecError> {
        self.objects
            .get(reference)
            .ok_or_else(|| ExecError::Unbound(reference.to_string()))
    }
}

impl Class {
    /// Run `method` on the current thread
    ///
    /// Lock hooks are reported to `emitter` with `<class>.<method>` as the
    /// context's method. `Invoke` of a method this class does not define is
    /// an external call and does nothing.
    ///
    /// # Errors
    /// - [`ExecError::NoSuchMethod`] if the class has no such method
    /// - [`ExecError::Unbound`] for a reference missing from `heap`
    /// - [`ExecError::IllegalMonitorState`] for unbalanced monitor operations
    /// - [`ExecError::StackOverflow`] past [`MAX_CALL_DEPTH`] nested calls
    pub fn run(&self, method: &str, heap: &Heap, emitter: &EventEmitter) -> Result<(), ExecError> {
        run_method(self, method, heap, emitter, 0)
    }
}

fn run_method(
    class: &Class,
    method: &str,
    heap: &Heap,
    emitter: &EventEmitter,
    depth: usize,
) -> Result<(), ExecError> {
    let site = format!("{}.{method}", class.name());
    if depth >= MAX_CALL_DEPTH {
        return Err(ExecError::StackOverflow(site));
    }
    let body = class
        .image()
        .method(method)
        .ok_or_else(|| ExecError::NoSuchMethod {
            class: class.name().to_string(),
            method: method.to_string(),
        })?;

    // Dropped on error, releasing whatever is still held
    let mut held: Vec<(&str, ReentrantMutexGuard<'_, ()>)> = Vec::new();
    for op in &body.code {
        match op {
            Op::MonitorEnter(reference) => {
                let bound = heap.lookup(reference)?;
                held.push((reference.as_str(), bound.monitor.lock()));
            }
            Op::MonitorExit(reference) => match held.pop() {
                Some((top, guard)) if top == reference.as_str() => drop(guard),
                Some((top, _)) => {
                    return Err(ExecError::IllegalMonitorState {
                        method: site,
                        reason: format!("exit of {reference} while {top} is innermost"),
                    });
                }
                None => {
                    return Err(ExecError::IllegalMonitorState {
                        method: site,
                        reason: format!("exit of unheld {reference}"),
                    });
                }
            },
            Op::LockHook { event, reference } => {
                let bound = heap.lookup(reference)?;
                emitter.record(*event, &bound.object, bound.class_name, reference, &site);
            }
            Op::Invoke(target) => {
                if class.image().method(target).is_some() {
                    run_method(class, target, heap, emitter, depth + 1)?;
                }
            }
            Op::Nop => {}
        }
    }

    if let Some((reference, _)) = held.last() {
        return Err(ExecError::IllegalMonitorState {
            method: site,
            reason: format!("{reference} still held on return"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{LockEvent, LockEventType, ThreadId};
    use crate::instrument::class_image::ClassImage;
    use crate::instrument::rewriter::{MonitorRewriter, RewriteRequest, Rewriter};
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Account;

    fn recording() -> (EventEmitter, Arc<Mutex<Vec<LockEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let emitter = EventEmitter::new(Some(Box::new(
            move |_: ThreadId, event: &LockEvent| sink_seen.lock().push(event.clone()),
        )));
        (emitter, seen)
    }

    fn define(image: &ClassImage) -> Class {
        Class::define(&image.name, image.encode().unwrap(), 1).unwrap()
    }

    fn instrument(image: &ClassImage) -> Class {
        let bytes = image.encode().unwrap();
        let request = RewriteRequest {
            loader: 1,
            class_name: &image.name,
            code_source: None,
            existing: None,
            bytes: &bytes,
        };
        let out = MonitorRewriter::new().rewrite(&request).unwrap().unwrap();
        Class::define(&image.name, out, 1).unwrap()
    }

    fn transfer() -> ClassImage {
        ClassImage::new("app.Bank")
            .with_method(
                "transfer",
                vec![
                    Op::MonitorEnter("from".into()),
                    Op::MonitorEnter("to".into()),
                    Op::Invoke("audit".into()),
                    Op::MonitorExit("to".into()),
                    Op::MonitorExit("from".into()),
                ],
            )
            .with_method(
                "audit",
                vec![Op::MonitorEnter("from".into()), Op::MonitorExit("from".into())],
            )
    }

    #[test]
    fn test_hooks_report_in_program_order() {
        let (emitter, seen) = recording();
        let heap = Heap::new()
            .with("from", &Arc::new(Account))
            .with("to", &Arc::new(Account));

        instrument(&transfer()).run("transfer", &heap, &emitter).unwrap();

        let seen = seen.lock();
        let trace: Vec<_> = seen
            .iter()
            .map(|e| (e.event_type(), e.context().lock_reference().to_string()))
            .collect();
        assert_eq!(
            trace,
            vec![
                (LockEventType::Acquire, "from".to_string()),
                (LockEventType::Acquire, "to".to_string()),
                (LockEventType::Acquire, "from".to_string()),
                (LockEventType::Release, "from".to_string()),
                (LockEventType::Release, "to".to_string()),
                (LockEventType::Release, "from".to_string()),
            ]
        );
        assert_eq!(seen[0].context().method(), "app.Bank.transfer");
        assert_eq!(seen[2].context().method(), "app.Bank.audit");
        assert_eq!(seen[0].lock(), seen[2].lock());
        assert!(seen[0].lock().class_name().ends_with("Account"));
    }

    #[test]
    fn test_plain_class_reports_nothing() {
        let (emitter, seen) = recording();
        let heap = Heap::new()
            .with("from", &Arc::new(Account))
            .with("to", &Arc::new(Account));

        define(&transfer()).run("transfer", &heap, &emitter).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_aliases_share_one_monitor() {
        let (emitter, seen) = recording();
        let account = Arc::new(Account);
        let heap = Heap::new().with("from", &account).with("to", &account);

        // Reentrant: entering the same object twice does not block
        instrument(&transfer()).run("transfer", &heap, &emitter).unwrap();

        let seen = seen.lock();
        assert!(seen.iter().all(|e| e.lock() == seen[0].lock()));
    }

    #[test]
    fn test_unbound_reference() {
        let (emitter, _) = recording();
        let heap = Heap::new().with("from", &Arc::new(Account));
        assert_eq!(
            define(&transfer()).run("transfer", &heap, &emitter),
            Err(ExecError::Unbound("to".to_string()))
        );
    }

    #[test]
    fn test_unbalanced_monitors() {
        let (emitter, _) = recording();
        let heap = Heap::new().with("this", &Arc::new(Account));
        let image = ClassImage::new("app.Broken")
            .with_method("leak", vec![Op::MonitorEnter("this".into())])
            .with_method("orphan", vec![Op::MonitorExit("this".into())]);
        let class = define(&image);

        assert!(matches!(
            class.run("leak", &heap, &emitter),
            Err(ExecError::IllegalMonitorState { .. })
        ));
        // The leaked monitor was released when the run failed
        assert!(matches!(
            class.run("orphan", &heap, &emitter),
            Err(ExecError::IllegalMonitorState { .. })
        ));
        assert!(matches!(
            class.run("missing", &heap, &emitter),
            Err(ExecError::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn test_recursion_is_bounded() {
        let (emitter, _) = recording();
        let image = ClassImage::new("app.Loop").with_method("spin", vec![Op::Invoke("spin".into())]);
        assert_eq!(
            define(&image).run("spin", &Heap::new(), &emitter),
            Err(ExecError::StackOverflow("app.Loop.spin".to_string()))
        );
    }
}
