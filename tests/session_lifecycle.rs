//! End-to-end coordination tests over a temp registry
//!
//! Exercises the inter-process contract at the filesystem level: multiple
//! "clients" (pids), one recorded tunnel, and the grace-window watcher,
//! without real sandboxes, tunnels, or sync daemons.

use std::sync::Mutex;
use std::time::Duration;

use sandlink::lifecycle::{self, GraceWatcher, SessionContext, Teardown};
use sandlink::proxy::tunnel_signature;
use sandlink::registry::Registry;
use sandlink::sandbox::error::Result as SandboxResult;
use sandlink::sandbox::{ControlPlane, ExecRequest};
use serial_test::serial;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingTeardown {
    calls: Mutex<Vec<String>>,
}

impl Teardown for RecordingTeardown {
    fn terminate_sync(&self, resource: &str) {
        self.calls.lock().unwrap().push(format!("sync:{}", resource));
    }
    fn kill_tunnel(&self, proxy_pid: u32) {
        self.calls.lock().unwrap().push(format!("tunnel:{}", proxy_pid));
    }
}

fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// A live process whose command line carries the tunnel signature, standing
/// in for a real forward process.
fn decoy_tunnel(resource: &str) -> std::process::Child {
    let signature = tunnel_signature(resource);
    std::process::Command::new("sh")
        .args(["-c", "sleep 60", signature.as_str()])
        .spawn()
        .unwrap()
}

#[test]
fn full_lifecycle_last_referent_triggers_teardown_after_grace() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::new(temp.path().join("resources"));
    let resource = "proj-1a2b3c4d";

    // Client A cold-starts: publishes the tunnel, registers itself
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut proxy = decoy_tunnel(resource);
    registry.publish(resource, port, proxy.id()).unwrap();
    registry.register(resource, std::process::id()).unwrap();

    // Client B joins the fast path: the tunnel validates as active
    let active = registry.query_active(resource).unwrap().unwrap();
    assert_eq!(active.port, port);
    registry.register(resource, 1).unwrap();

    // A leaves: not last, nothing happens
    assert!(!registry.unregister(resource, std::process::id()).unwrap());
    assert!(registry.recorded_tunnel(resource).unwrap().is_some());

    // B leaves: last referent, grace watcher takes over
    assert!(registry.unregister(resource, 1).unwrap());

    let teardown = RecordingTeardown::default();
    let watcher = GraceWatcher::new(registry.clone(), Duration::from_millis(300));
    assert!(watcher.run(resource, &teardown).unwrap());

    // Tunnel killed, sync terminated, registry gone
    {
        let calls = teardown.calls.lock().unwrap();
        assert!(calls.contains(&format!("sync:{}", resource)));
        assert!(calls.contains(&format!("tunnel:{}", proxy.id())));
    }
    assert!(!registry.resource_dir(resource).exists());

    let _ = proxy.kill();
    let _ = proxy.wait();
}

#[test]
fn reconnect_during_grace_window_adopts_infrastructure() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::new(temp.path().join("resources"));
    let resource = "proj-reconnect";

    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    registry.publish(resource, port, std::process::id()).unwrap();

    registry.register(resource, std::process::id()).unwrap();
    assert!(registry.unregister(resource, std::process::id()).unwrap());

    let teardown = RecordingTeardown::default();
    let watcher = GraceWatcher::new(registry.clone(), Duration::from_secs(10));

    // Client B reconnects while the watcher waits
    let registrar = {
        let registry = registry.clone();
        let resource = resource.to_string();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            registry.register(&resource, 1).unwrap();
        })
    };

    let torn_down = watcher.run(resource, &teardown).unwrap();
    registrar.join().unwrap();

    assert!(!torn_down);
    assert!(teardown.calls.lock().unwrap().is_empty());

    // B's view of the world is fully intact
    let active = registry.query_active(resource).unwrap().unwrap();
    assert_eq!(active.port, port);
    assert_eq!(registry.live_referents(resource).unwrap(), vec![1]);
}

#[test]
fn crashed_client_does_not_block_teardown() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::new(temp.path().join("resources"));
    let resource = "proj-crashed";

    // A crashed client left a reference file behind with a dead pid
    registry.register(resource, dead_pid()).unwrap();
    registry.register(resource, std::process::id()).unwrap();

    // The live client leaving is still "last": the dead holder is pruned,
    // not trusted
    assert!(registry.unregister(resource, std::process::id()).unwrap());
}

/// Control plane that reports its CLI missing, so a cold start fails
/// immediately after the fast path falls through.
struct UnavailableControl;

impl ControlPlane for UnavailableControl {
    fn is_available(&self) -> bool {
        false
    }
    fn sandbox_exists(&self, _name: &str) -> SandboxResult<bool> {
        Ok(false)
    }
    fn create_sandbox(&self, _name: &str, _image: Option<&str>) -> SandboxResult<()> {
        Ok(())
    }
    fn exec(&self, _name: &str, _request: &ExecRequest) -> SandboxResult<std::process::Output> {
        unimplemented!("not reached by these tests")
    }
    fn forward_args(&self, _name: &str, _local: u16, _remote: u16) -> Vec<String> {
        vec!["sleep".to_string(), "60".to_string()]
    }
}

#[test]
#[serial]
fn failed_fast_path_join_does_not_leak_registration() {
    let temp = TempDir::new().unwrap();
    std::env::set_var("SANDLINK_STATE_DIR", temp.path().join("state"));
    std::env::set_var("SANDLINK_CONFIG_DIR", temp.path().join("config"));

    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let ctx = SessionContext::new(&project).unwrap();

    // A recorded tunnel that validates as active: live pid, bound port.
    // Joining still fails because no sync session can be built behind it,
    // and the cold-start fall-through fails fast on the missing CLI.
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut proxy = std::process::Command::new("sleep").arg("60").spawn().unwrap();
    ctx.registry.publish(&ctx.resource, port, proxy.id()).unwrap();

    assert!(lifecycle::establish(&ctx, &UnavailableControl).is_err());

    // The transient fast-path registration must not survive the failed
    // join, and the stale tunnel record must be cleared
    assert!(ctx.registry.live_referents(&ctx.resource).unwrap().is_empty());
    assert!(ctx.registry.recorded_tunnel(&ctx.resource).unwrap().is_none());

    let _ = proxy.kill();
    let _ = proxy.wait();
    std::env::remove_var("SANDLINK_STATE_DIR");
    std::env::remove_var("SANDLINK_CONFIG_DIR");
}

#[test]
fn stale_tunnel_record_reads_as_absent_for_new_clients() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::new(temp.path().join("resources"));
    let resource = "proj-stale";

    // Both files exist, but the pid is dead and nothing listens on the port
    registry.publish(resource, 45991, dead_pid()).unwrap();

    assert!(registry.recorded_tunnel(resource).unwrap().is_some());
    assert!(registry.query_active(resource).unwrap().is_none());
}
