//! Resolving registered services and talking to them over a `LocalBus`.

use std::sync::Arc;
use std::time::Duration;

use svcdb::RegistryEvent;
use svcdb::ServiceRegistry;
use svcfw::Config;
use svcfw::Error;
use svcfw::ServiceManager;
use svcfw::entry_key;
use svcmeta::Descriptor;
use svcmeta::Filter;
use svcmeta::Scope;
use svcmeta::ServiceMetadata;
use svcmeta::ServiceType;
use svcpack::CallError;
use svcpack::Invocation;
use svcpack::Value;
use svcrpc::Address;
use svcrpc::Bus;
use svcrpc::Channel;
use svcrpc::ConnectOptions;
use svcrpc::InstanceManager;
use svcrpc::InstancePolicy;
use svcrpc::Listener;
use svcrpc::LocalBus;
use svcrpc::Publisher;
use svcrpc::ServiceObject;

const SYSINFO: &str = r#"
version = "1.1"

[service]
name = "Acme"
ipcaddress = "acme_service"

[[interface]]
name = "com.acme.sysinfo"
version = "1.2"
"#;

struct SysInfo;

impl ServiceObject for SysInfo {
    fn invoke(&self, call: Invocation) -> Result<Value, CallError> {
        match call {
            Invocation::GetProperty { name } if name == "hostname" => Ok(Value::Str("testbox".into())),
            Invocation::Method { name, .. } if name == "uptime" => Ok(Value::Int(42)),
            other => Err(CallError::no_such_method(other.name())),
        }
    }
}

fn registry_with(doc: &str) -> (Arc<ServiceRegistry>, Vec<Descriptor>) {
    let registry = ServiceRegistry::in_memory().unwrap();
    let descriptors = ServiceMetadata::parse_str(doc).unwrap().descriptors(Scope::User);
    registry.register(&descriptors, "").unwrap();
    (Arc::new(registry), descriptors)
}

async fn publish(bus: &LocalBus, descriptor: &Descriptor) -> Publisher {
    let mut publisher = Publisher::new(Arc::new(bus.clone()), Arc::new(InstanceManager::new()));
    publisher.create_entry(entry_key(descriptor), InstancePolicy::Private, |_| {
        Ok(Arc::new(SysInfo) as Arc<dyn ServiceObject>)
    });
    publisher.publish(descriptor.location()).await.unwrap();
    publisher
}

fn manager(registry: Arc<ServiceRegistry>, bus: &LocalBus) -> ServiceManager {
    ServiceManager::new(registry, Arc::new(bus.clone()), Scope::User)
        .with_connect_options(ConnectOptions::default().with_timeout(Duration::from_secs(5)))
}

#[test]
fn entry_key_uses_major_minor_version() {
    let descriptor = Descriptor::builder("Acme", "com.acme.sysinfo").version(3, 14).build();
    let key = entry_key(&descriptor);
    assert_eq!(key.service, "Acme");
    assert_eq!(key.interface, "com.acme.sysinfo");
    assert_eq!(key.version, "3.14");
}

#[tokio::test]
async fn loads_default_implementation_and_calls_it() {
    let (registry, descriptors) = registry_with(SYSINFO);
    let bus = LocalBus::default();
    let _publisher = publish(&bus, &descriptors[0]).await;
    let manager = manager(registry, &bus);

    let object = manager.load_interface("com.acme.sysinfo").await.unwrap();
    assert_eq!(object.entry(), &entry_key(&descriptors[0]));
    assert_eq!(object.get("hostname").await.unwrap(), Value::Str("testbox".into()));
    assert_eq!(object.call("uptime", Vec::new()).await.unwrap(), Value::Int(42));

    let err = object.call("reboot", Vec::new()).await.unwrap_err();
    assert!(matches!(err, svcrpc::Error::CallFailed(_)));
    object.close().await.unwrap();
}

#[tokio::test]
async fn loads_a_descriptor_found_by_filter() {
    let (registry, _) = registry_with(SYSINFO);
    let bus = LocalBus::default();
    let manager = manager(registry, &bus);

    let found = manager.find(&Filter::new().interface("COM.ACME.SYSINFO")).unwrap();
    assert_eq!(found.len(), 1);
    let _publisher = publish(&bus, &found[0]).await;

    let first = manager.load(&found[0]).await.unwrap();
    let second = manager.load(&found[0]).await.unwrap();
    assert_ne!(first.instance_id(), second.instance_id());
}

#[tokio::test]
async fn plugins_are_not_loaded_over_the_bus() {
    let plugin = r#"
[service]
name = "Local"
filepath = "liblocal.so"

[[interface]]
name = "com.acme.local"
version = "1.0"
"#;
    let (registry, descriptors) = registry_with(plugin);
    assert_eq!(descriptors[0].service_type(), ServiceType::Plugin);
    let manager = manager(registry, &LocalBus::default());

    let err = manager.load_interface("com.acme.local").await.unwrap_err();
    assert!(matches!(err, Error::NotInterProcess(_)));
}

#[tokio::test]
async fn missing_interface_or_listener() {
    let (registry, _) = registry_with(SYSINFO);
    let manager = manager(registry, &LocalBus::default());

    let err = manager.load_interface("com.acme.missing").await.unwrap_err();
    assert!(matches!(err, Error::Registry(svcdb::Error::NotFound)));

    // Registered but nobody published it.
    let err = manager.load_interface("com.acme.sysinfo").await.unwrap_err();
    assert!(matches!(err, Error::Endpoint(svcrpc::Error::Channel(svcrpc::channel::Error::NoListener(_)))));

    let incomplete = Descriptor::builder("Acme", "com.acme.sysinfo").build();
    let err = manager.load(&incomplete).await.unwrap_err();
    assert!(matches!(err, Error::InvalidDescriptor(_)));
}

#[tokio::test]
async fn registry_changes_reach_subscribers() {
    let (registry, _) = registry_with(SYSINFO);
    let manager = manager(registry.clone(), &LocalBus::default());
    let mut events = manager.subscribe();

    registry.unregister("Acme", Scope::User, "").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, RegistryEvent::ServiceRemoved { .. }));
    assert_eq!(event.service_name(), "Acme");
}

#[tokio::test]
async fn config_request_timeout_bounds_loads() {
    let (registry, descriptors) = registry_with(SYSINFO);
    let bus = LocalBus::default();
    let listener = bus.bind(&Address::new("com.acme.sysinfo", descriptors[0].location())).await.unwrap();
    // Accepts the connection and never answers the handshake.
    let silent = tokio::spawn(async move {
        let channel = listener.accept().await.unwrap();
        while let Ok(Some(_)) = channel.recv().await {}
    });

    let config = Config::from_toml("[endpoint]\nrequest_timeout_ms = 50\n").unwrap();
    let manager = ServiceManager::from_config(registry, Arc::new(bus.clone()), Scope::User, &config);
    let err = tokio::time::timeout(Duration::from_secs(5), manager.load_interface("com.acme.sysinfo"))
        .await
        .expect("configured timeout applies")
        .unwrap_err();
    assert!(matches!(err, Error::Endpoint(svcrpc::Error::Timeout)));
    tokio::time::timeout(Duration::from_secs(5), silent).await.unwrap().unwrap();
}

#[tokio::test]
async fn config_quits_publisher_after_last_instance() {
    let (registry, descriptors) = registry_with(SYSINFO);
    let bus = LocalBus::default();
    let config = Config::from_toml("[endpoint]\nquit_on_last_instance_closed = true\n").unwrap();

    let mut publisher = Publisher::new(Arc::new(bus.clone()), Arc::new(InstanceManager::new()));
    publisher.create_entry(entry_key(&descriptors[0]), InstancePolicy::Private, |_| {
        Ok(Arc::new(SysInfo) as Arc<dyn ServiceObject>)
    });
    config.apply_to(&mut publisher);
    publisher.publish(descriptors[0].location()).await.unwrap();
    let mut quit = publisher.quit_signal();

    let manager = ServiceManager::from_config(registry, Arc::new(bus.clone()), Scope::User, &config);
    let object = manager.load_interface("com.acme.sysinfo").await.unwrap();
    assert_eq!(object.call("uptime", Vec::new()).await.unwrap(), Value::Int(42));
    assert!(!*quit.borrow());

    object.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), quit.wait_for(|q| *q))
        .await
        .expect("quit requested")
        .unwrap();
}
