use std::sync::{Arc, Barrier};
use std::thread;

use mailbridge::affinity::{AffinityError, ThreadAffinityRegistry};
use mailbridge::host::sandbox::{RuntimeEvent, SandboxRuntime};
use speculate2::speculate;

speculate! {
    before {
        let runtime = Arc::new(SandboxRuntime::new());
        let registry = Arc::new(ThreadAffinityRegistry::new(runtime.clone()));
    }

    describe "ensure_initialized" {
        it "initializes the calling thread once" {
            registry.ensure_initialized().expect("Initialization failed");
            registry.ensure_initialized().expect("Initialization failed");
            registry.ensure_initialized().expect("Initialization failed");

            assert_eq!(runtime.initialization_count(), 1);
            assert_eq!(
                runtime.events(),
                vec![RuntimeEvent::Initialized(thread::current().id())]
            );
        }

        it "leaves a failed thread unrecorded so it can retry" {
            runtime.fail_next(1);

            let err = registry.ensure_initialized().unwrap_err();
            assert!(matches!(err, AffinityError::Initialize(_)));
            assert!(!registry.is_initialized());
            assert_eq!(registry.initialized_thread_count(), 0);

            registry.ensure_initialized().expect("Retry failed");
            assert!(registry.is_initialized());
            assert_eq!(runtime.initialization_count(), 1);
        }

        it "initializes every thread exactly once under contention" {
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..10 {
                            registry.ensure_initialized().expect("Initialization failed");
                        }
                        registry.is_initialized()
                    })
                })
                .collect();

            for handle in handles {
                assert!(handle.join().expect("Worker panicked"));
            }
            assert_eq!(runtime.initialization_count(), threads);
            assert_eq!(registry.initialized_thread_count(), threads);
        }
    }

    describe "is_initialized" {
        it "is per thread" {
            registry.ensure_initialized().expect("Initialization failed");

            let registry_for_other = registry.clone();
            let other = thread::spawn(move || registry_for_other.is_initialized())
                .join()
                .expect("Worker panicked");

            assert!(registry.is_initialized());
            assert!(!other);
        }
    }
}
