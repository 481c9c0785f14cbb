//! Many host threads sharing one guest object.

use pybridge::{
    decref, evaluate, get_attribute, invoke, ref_count, start, BridgeConfig, InputMode,
    OwnedHandle,
};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const CYCLES: usize = 50;

#[test]
fn test_concurrent_acquire_release_is_balanced() {
    start(&BridgeConfig::default()).unwrap();

    let ns = OwnedHandle::from_new_reference(
        evaluate(
            "__import__('types').SimpleNamespace(shared=object())",
            InputMode::Expression,
            None,
            None,
        )
        .unwrap(),
    );
    let anchor = get_attribute(ns.handle(), "shared").unwrap();
    let baseline = ref_count(anchor).unwrap();

    let ns = Arc::new(ns);
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let ns = Arc::clone(&ns);
            thread::spawn(move || {
                for _ in 0..CYCLES {
                    let shared = get_attribute(ns.handle(), "shared").unwrap();
                    let hash = invoke(shared, "__hash__", &[], None).unwrap();
                    decref(hash).unwrap();
                    decref(shared).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ref_count(anchor).unwrap(), baseline);
    decref(anchor).unwrap();
}
