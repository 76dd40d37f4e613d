use lockcard::instrument::{ClassImage, MemorySource, Op, SourceLoader, TransformLoader};
use lockcard::instrument::{MonitorRewriter, Rewriter};
use lockcard::{EventEmitter, LockEvent, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;

#[allow(dead_code)]
pub type Recorded = Arc<Mutex<Vec<(ThreadId, LockEvent)>>>;

/// Emitter whose sink records every event with the reporting thread
#[allow(dead_code)]
pub fn recording_emitter() -> (Arc<EventEmitter>, Recorded) {
    let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let emitter = EventEmitter::new(Some(Box::new(
        move |thread_id: ThreadId, event: &LockEvent| {
            sink_seen.lock().push((thread_id, event.clone()));
        },
    )));
    (Arc::new(emitter), seen)
}

/// A class with one synchronized method
#[allow(dead_code)]
pub fn synchronized_class(name: &str) -> ClassImage {
    ClassImage::new(name).with_method(
        "run",
        vec![
            Op::MonitorEnter("this".into()),
            Op::Invoke("work".into()),
            Op::MonitorExit("this".into()),
        ],
    )
}

/// Foo and Bar with monitors, Pure without, plus a protected std class
#[allow(dead_code)]
pub fn class_source() -> Arc<MemorySource> {
    let mut source = MemorySource::new();
    for name in ["app.Foo", "app.Bar", "std.sync.Pool"] {
        source
            .insert_image(&synchronized_class(name))
            .expect("Failed to encode class");
    }
    source
        .insert_image(&ClassImage::new("app.Pure").with_method("run", vec![Op::Nop]))
        .expect("Failed to encode class");
    Arc::new(source)
}

/// Parent loader plus a transforming child selecting `selector`
#[allow(dead_code)]
pub fn transform_loader_with<R>(rewriter: R, selector: &str) -> (Arc<SourceLoader>, TransformLoader)
where
    R: Rewriter + 'static,
{
    let source = class_source();
    let parent = Arc::new(SourceLoader::new(source.clone()));
    let loader = TransformLoader::new(rewriter, parent.clone(), source)
        .with_selector(selector)
        .expect("Invalid selector");
    (parent, loader)
}

#[allow(dead_code)]
pub fn transform_loader(selector: &str) -> (Arc<SourceLoader>, TransformLoader) {
    transform_loader_with(MonitorRewriter::new(), selector)
}
