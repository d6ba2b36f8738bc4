use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mailbridge::affinity::ThreadAffinityRegistry;
use mailbridge::bridge::{BridgeError, BridgeOptions};
use mailbridge::host::sandbox::{ItemRecord, RuntimeEvent, SandboxHost, SandboxRuntime};
use mailbridge::host::{FolderKind, HostConnector};
use mailbridge::lifecycle::{LifecycleError, LifecycleManager, LifecycleState, WarmupPolicy};
use speculate2::speculate;

fn quick_warmup(attempts: u32) -> WarmupPolicy {
    WarmupPolicy {
        attempts,
        backoff: Duration::ZERO,
    }
}

fn manager_for(host: &SandboxHost, runtime: &Arc<SandboxRuntime>, warmup: WarmupPolicy) -> LifecycleManager {
    let registry = Arc::new(ThreadAffinityRegistry::new(runtime.clone()));
    LifecycleManager::new(registry, Arc::new(host.clone()), BridgeOptions::default(), warmup)
}

speculate! {
    before {
        let host = SandboxHost::new();
        let runtime = Arc::new(SandboxRuntime::for_host(&host));
        host.add_item(FolderKind::Inbox, ItemRecord::mail("Welcome", "it@example.com"));
    }

    describe "start" {
        it "reaches Ready and publishes the session" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(5));
            assert_eq!(manager.state(), LifecycleState::Idle);
            assert!(manager.session().is_none());

            let count = manager.start().expect("Start failed").inbox_count().expect("Count failed");

            assert_eq!(count, 1);
            assert_eq!(manager.state(), LifecycleState::Ready);
            assert!(manager.session().is_some());
            assert!(manager.registry().is_initialized());
        }

        it "retries the warm-up call until the host answers" {
            host.fail_counts(4);
            let mut manager = manager_for(&host, &runtime, quick_warmup(5));

            manager.start().expect("Start failed");

            assert_eq!(manager.state(), LifecycleState::Ready);
        }

        it "fails after exhausting warm-up attempts and releases everything" {
            host.fail_counts(5);
            let mut manager = manager_for(&host, &runtime, quick_warmup(5));

            let err = manager.start().err().expect("Start should fail");

            assert!(matches!(err, LifecycleError::WarmupExhausted { attempts: 5, .. }));
            assert_eq!(manager.state(), LifecycleState::Failed);
            assert!(manager.session().is_none());
            assert!(!manager.registry().is_initialized());
            assert_eq!(host.live_handles(), 0);
            assert_eq!(runtime.events().last(), Some(&RuntimeEvent::FreedUnused));
        }

        it "waits between warm-up attempts" {
            host.fail_counts(2);
            let mut manager = manager_for(&host, &runtime, WarmupPolicy {
                attempts: 3,
                backoff: Duration::from_millis(20),
            });

            let started = std::time::Instant::now();
            manager.start().expect("Start failed");

            assert!(started.elapsed() >= Duration::from_millis(40));
        }

        it "launches the host when none is running" {
            host.stop();
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));

            manager.start().expect("Start failed");

            assert!(host.is_running());
            assert_eq!(manager.state(), LifecycleState::Ready);
        }

        it "fails when the host can be neither attached nor launched" {
            host.stop();
            host.fail_launch();
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));

            let err = manager.start().err().expect("Start should fail");

            assert!(matches!(err, LifecycleError::Connect(BridgeError::Unavailable(_))));
            assert_eq!(manager.state(), LifecycleState::Failed);
            assert!(!manager.registry().is_initialized());
        }

        it "fails when the runtime cannot be initialized" {
            runtime.fail_next(1);
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));

            let err = manager.start().err().expect("Start should fail");

            assert!(matches!(err, LifecycleError::Runtime(_)));
            assert_eq!(manager.state(), LifecycleState::Failed);
        }

        it "refuses to start twice" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));
            manager.start().expect("Start failed");

            let err = manager.start().err().expect("Second start should fail");

            assert!(matches!(err, LifecycleError::InvalidState(LifecycleState::Ready)));
        }
    }

    describe "thread affinity" {
        it "rejects host calls from a thread that never initialized the runtime" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));
            manager.start().expect("Start failed");

            let other = host.clone();
            let result = thread::spawn(move || other.attach().err().map(|e| e.to_string()))
            .join()
            .expect("Worker panicked");

            assert!(result.expect("Attach should fail").contains("not initialized"));
        }
    }

    describe "shutdown" {
        it "releases handles before uninitializing the thread" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));
            manager.start().expect("Start failed");
            assert!(host.live_handles() > 0);

            manager.shutdown();

            assert_eq!(manager.state(), LifecycleState::Closed);
            assert!(manager.session().is_none());
            let me = thread::current().id();
            assert_eq!(
                runtime.events(),
                vec![
                    RuntimeEvent::Initialized(me),
                    RuntimeEvent::Uninitialized { thread: me, live_handles: 0 },
                    RuntimeEvent::FreedUnused,
                ]
            );
        }

        it "is idempotent" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));
            manager.start().expect("Start failed");

            manager.shutdown();
            manager.shutdown();

            assert_eq!(manager.state(), LifecycleState::Closed);
            assert_eq!(runtime.events().len(), 3);
        }

        it "closes an idle manager without touching the runtime" {
            let mut manager = manager_for(&host, &runtime, quick_warmup(1));

            manager.shutdown();

            assert_eq!(manager.state(), LifecycleState::Closed);
            assert!(runtime.events().is_empty());
        }

        it "runs when the manager is dropped" {
            {
                let mut manager = manager_for(&host, &runtime, quick_warmup(1));
                manager.start().expect("Start failed");
            }

            assert_eq!(host.live_handles(), 0);
            assert_eq!(runtime.events().last(), Some(&RuntimeEvent::FreedUnused));
        }
    }
}
