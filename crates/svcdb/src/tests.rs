use std::time::Duration;

use svcmeta::CapabilityMatch;
use svcmeta::Descriptor;
use svcmeta::Filter;
use svcmeta::Scope;
use svcmeta::Version;
use svcmeta::VersionMatch;

use crate::*;

fn desc(service: &str, interface: &str, major: i32, minor: i32) -> Descriptor {
    Descriptor::builder(service, interface)
        .version(major, minor)
        .location(format!("{}_loc", service.to_lowercase()))
        .build()
}

fn acme() -> Descriptor {
    Descriptor::builder("Acme", "com.acme.sysinfo")
        .version(2, 3)
        .location("acme_service")
        .capability("ReadUserData")
        .custom_attribute("vendor", "acme")
        .service_description("Acme system services")
        .build()
}

fn user_db() -> Database {
    Database::open_in_memory(Scope::User).unwrap()
}

fn names(found: &[Descriptor]) -> Vec<String> {
    found.iter().map(|d| format!("{}:{}", d.service_name(), d.version())).collect()
}

// ============================================================================
//  REGISTER / FIND
// ============================================================================

#[test]
fn test_acme_scenario() {
    let db = user_db();
    db.register(&[acme()], "").unwrap();

    let loadable = Filter::new().capabilities(CapabilityMatch::MatchLoadable, Vec::<String>::new());
    assert!(db.find(&loadable).unwrap().is_empty());

    let minimum = Filter::new().capabilities(CapabilityMatch::MatchMinimum, Vec::<String>::new());
    let found = db.find(&minimum).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].same_fields(&acme()));

    db.unregister("Acme", "").unwrap();
    assert!(db.find(&Filter::new().service("Acme")).unwrap().is_empty());
}

#[test]
fn test_find_applies_every_filter_axis() {
    let db = user_db();
    db.register(&[desc("One", "x.api", 1, 0), desc("One", "x.other", 1, 0)], "").unwrap();
    db.register(&[desc("Two", "x.api", 1, 4)], "").unwrap();
    db.register(&[desc("Three", "x.api", 2, 0)], "").unwrap();

    let all = db.find(&Filter::new().interface("X.API")).unwrap();
    assert_eq!(names(&all), ["One:1.0", "Two:1.4", "Three:2.0"]);

    let min = db.find(&Filter::new().interface_version("x.api", "1.2", VersionMatch::Minimum)).unwrap();
    assert_eq!(names(&min), ["Two:1.4", "Three:2.0"]);

    let exact = db.find(&Filter::new().interface_version("x.api", "1.4", VersionMatch::Exact)).unwrap();
    assert_eq!(names(&exact), ["Two:1.4"]);

    let wildcard = db.find(&Filter::new().interface_version("x.api", "one.four", VersionMatch::Exact)).unwrap();
    assert_eq!(wildcard.len(), 3);

    let by_service = db.find(&Filter::new().service("one")).unwrap();
    assert_eq!(by_service.len(), 2);
    assert!(by_service.iter().all(|d| d.scope() == Scope::User));
}

#[test]
fn test_find_custom_attributes() {
    let db = user_db();
    db.register(&[acme()], "").unwrap();

    assert_eq!(db.find(&Filter::new().custom_attribute("vendor", "acme")).unwrap().len(), 1);
    assert!(db.find(&Filter::new().custom_attribute("vendor", "")).unwrap().is_empty());
    assert!(db.find(&Filter::new().custom_attribute("colour", "")).unwrap().is_empty());
}

#[test]
fn test_register_rejects_invalid_and_foreign_scope() {
    let db = user_db();
    let invalid = Descriptor::builder("S", "").version(1, 0).build();
    assert!(matches!(db.register(&[invalid], ""), Err(Error::InvalidDescriptor(_))));

    let system = acme().to_builder().scope(Scope::System).build();
    assert!(matches!(db.register(&[system], ""), Err(Error::InvalidDescriptor(_))));

    assert!(matches!(db.register(&[], ""), Err(Error::InvalidDescriptor(_))));
}

#[test]
fn test_register_conflicts() {
    let db = user_db();
    db.register(&[desc("Alpha", "x.api", 1, 0)], "").unwrap();

    // same service again
    assert_eq!(
        db.register(&[desc("ALPHA", "x.new", 1, 0)], ""),
        Err(Error::LocationAlreadyRegistered { service: "ALPHA".into() })
    );

    // same location under another name
    let squatter = Descriptor::builder("Beta", "x.beta").version(1, 0).location("alpha_loc").build();
    assert_eq!(
        db.register(&[squatter], ""),
        Err(Error::LocationAlreadyRegistered { service: "Beta".into() })
    );

    // interface version claimed by Alpha
    assert_eq!(
        db.register(&[desc("Gamma", "X.Api", 1, 0)], ""),
        Err(Error::IfaceImplAlreadyRegistered { interface: "X.Api".into(), version: Version::new(1, 0) })
    );
}

#[test]
fn test_register_is_atomic() {
    let db = user_db();
    db.register(&[desc("Alpha", "x.api", 1, 0)], "").unwrap();

    let batch = [desc("Beta", "x.beta", 1, 0), desc("Beta", "x.other", 3, 1), desc("Beta", "x.api", 1, 0)];
    assert!(matches!(db.register(&batch, ""), Err(Error::IfaceImplAlreadyRegistered { .. })));

    assert!(db.find(&Filter::new().service("Beta")).unwrap().is_empty());
    assert_eq!(db.services(None).unwrap(), ["Alpha"]);
    assert_eq!(db.interface_default("x.beta"), Err(Error::NotFound));

    let duplicated = [desc("Delta", "x.delta", 1, 0), desc("Delta", "x.delta", 1, 0)];
    assert!(matches!(db.register(&duplicated, ""), Err(Error::IfaceImplAlreadyRegistered { .. })));
    assert!(db.find(&Filter::new().service("Delta")).unwrap().is_empty());
}

#[test]
fn test_services_listing() {
    let db = user_db();
    db.register(&[desc("One", "x.api", 1, 0), desc("One", "x.other", 1, 0)], "").unwrap();
    db.register(&[desc("Two", "x.other", 2, 0)], "").unwrap();

    assert_eq!(db.services(None).unwrap(), ["One", "Two"]);
    assert_eq!(db.services(Some("x.api")).unwrap(), ["One"]);
    assert_eq!(db.services(Some("X.OTHER")).unwrap(), ["One", "Two"]);
    assert!(db.services(Some("x.none")).unwrap().is_empty());
}

#[test]
fn test_names_fold_beyond_ascii() {
    let db = user_db();
    db.register(&[desc("Ärger", "Öl.api", 1, 0)], "").unwrap();

    assert_eq!(names(&db.find(&Filter::new().service("ärger")).unwrap()), ["Ärger:1.0"]);
    assert_eq!(names(&db.find(&Filter::new().interface("ÖL.API")).unwrap()), ["Ärger:1.0"]);
    assert_eq!(db.services(Some("öl.api")).unwrap(), ["Ärger"]);
    assert_eq!(db.interface_default("öl.API").unwrap().service_name(), "Ärger");

    let clash = Descriptor::builder("ÄRGER", "other.api").version(1, 0).location("elsewhere").build();
    assert!(matches!(db.register(&[clash], ""), Err(Error::LocationAlreadyRegistered { .. })));
    let same = Descriptor::builder("Fremd", "öl.api").version(1, 0).location("fremd").build();
    assert!(matches!(db.register(&[same], ""), Err(Error::IfaceImplAlreadyRegistered { .. })));

    db.unregister("ärger", "").unwrap();
    assert!(db.find(&Filter::new()).unwrap().is_empty());
}

// ============================================================================
//  DEFAULTS
// ============================================================================

#[test]
fn test_default_tracks_highest_version_and_recomputes() {
    let db = user_db();
    db.register(&[desc("Low", "x.api", 1, 0)], "").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Low");

    db.register(&[desc("High", "x.api", 2, 1)], "").unwrap();
    db.register(&[desc("Mid", "x.api", 1, 9)], "").unwrap();
    assert_eq!(db.interface_default("X.API").unwrap().service_name(), "High");

    db.unregister("High", "").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Mid");

    db.unregister("Mid", "").unwrap();
    db.unregister("Low", "").unwrap();
    assert_eq!(db.interface_default("x.api"), Err(Error::NotFound));
    assert_eq!(db.default_reference("x.api").unwrap(), None);
}

#[test]
fn test_removing_other_implementation_keeps_default() {
    let db = user_db();
    db.register(&[desc("Zed", "x.api", 3, 0)], "").unwrap();
    db.register(&[desc("Top", "x.api", 5, 0)], "").unwrap();
    db.register(&[desc("Abe", "x.other", 1, 0)], "").unwrap();

    db.unregister("Zed", "").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Top");
    assert_eq!(db.interface_default("x.other").unwrap().service_name(), "Abe");

    db.unregister("Top", "").unwrap();
    assert_eq!(db.interface_default("x.api"), Err(Error::NotFound));
}

#[test]
fn test_pinned_default_survives_higher_registration() {
    let db = user_db();
    db.register(&[desc("Old", "x.api", 1, 0)], "").unwrap();
    db.register(&[desc("New", "x.api", 2, 0)], "").unwrap();

    db.set_default(&desc("Old", "x.api", 1, 0)).unwrap();
    db.register(&[desc("Newer", "x.api", 3, 0)], "").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Old");

    // removing the pinned target falls back to automatic selection
    db.unregister("Old", "").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Newer");
}

#[test]
fn test_set_default_by_name_picks_highest_version_of_service() {
    let db = user_db();
    db.register(&[desc("Multi", "x.api", 1, 0), desc("Multi", "x.api", 1, 5)], "").unwrap();
    db.register(&[desc("Other", "x.api", 4, 0)], "").unwrap();

    db.set_default_by_name("multi", "x.api").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().version(), Version::new(1, 5));

    assert_eq!(db.set_default_by_name("Multi", "x.none"), Err(Error::NotFound));
    assert_eq!(db.set_default_by_name("Nobody", "x.api"), Err(Error::NotFound));
    assert_eq!(db.set_default(&desc("Multi", "x.api", 9, 9)), Err(Error::NotFound));
}

#[test]
fn test_foreign_defaults() {
    let db = user_db();
    db.register(&[desc("Local", "x.api", 1, 0)], "").unwrap();
    let local_id = db.descriptor_id(&desc("Local", "x.api", 1, 0)).unwrap();

    assert!(matches!(db.set_foreign_default("x.api", &local_id), Err(Error::InvalidDescriptor(_))));
    assert!(matches!(db.remove_foreign_default(&local_id), Err(Error::InvalidDescriptor(_))));

    db.set_foreign_default("x.api", "elsewhere-1").unwrap();
    assert_eq!(db.default_reference("x.api").unwrap().as_deref(), Some("elsewhere-1"));
    assert_eq!(db.interface_default("x.api"), Err(Error::NotFound));

    // foreign defaults are pinned
    db.register(&[desc("Later", "x.api", 7, 0)], "").unwrap();
    assert_eq!(db.default_reference("x.api").unwrap().as_deref(), Some("elsewhere-1"));

    db.remove_foreign_default("elsewhere-1").unwrap();
    assert_eq!(db.interface_default("x.api").unwrap().service_name(), "Later");
    assert_eq!(db.remove_foreign_default("elsewhere-1"), Err(Error::NotFound));
}

// ============================================================================
//  OWNERSHIP / LIFECYCLE
// ============================================================================

#[test]
fn test_owner_token_guards_unregister() {
    let db = user_db();
    db.register(&[desc("Owned", "x.api", 1, 0)], "secret").unwrap();

    assert_eq!(db.unregister("Owned", "guess"), Err(Error::NoWritePermissions));
    assert_eq!(db.unregister("Owned", ""), Err(Error::NoWritePermissions));
    assert_eq!(db.find(&Filter::new()).unwrap().len(), 1);

    db.unregister("Owned", "secret").unwrap();
    assert_eq!(db.unregister("Owned", "secret"), Err(Error::NotFound));
}

#[test]
fn test_closed_store_reports_not_open() {
    let db = user_db();
    db.close();
    assert!(!db.is_open());
    assert_eq!(db.find(&Filter::new()), Err(Error::NotOpen));
    assert_eq!(db.register(&[acme()], ""), Err(Error::NotOpen));
    assert_eq!(db.interface_default("x"), Err(Error::NotOpen));
}

#[test]
fn test_store_persists_and_opens_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("user.db");

    {
        let db = Database::open(&path, Scope::User, OpenOptions::default()).unwrap();
        db.register(&[acme()], "").unwrap();
    }

    let options = OpenOptions { read_only: true, ..OpenOptions::default() };
    let db = Database::open(&path, Scope::User, options).unwrap();
    let found = db.find(&Filter::new().service("acme")).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].same_fields(&acme()));
    assert_eq!(db.interface_default("com.acme.sysinfo").unwrap().service_name(), "Acme");

    assert_eq!(db.register(&[desc("New", "x.api", 1, 0)], ""), Err(Error::NoWritePermissions));
    assert_eq!(db.unregister("Acme", ""), Err(Error::NoWritePermissions));
}

#[test]
fn test_locked_store_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");

    let options = OpenOptions { busy_timeout: Duration::from_millis(50), ..OpenOptions::default() };
    let db = Database::open(&path, Scope::User, options).unwrap();

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    assert_eq!(db.register(&[acme()], ""), Err(Error::Timeout));

    holder.execute_batch("ROLLBACK").unwrap();
    db.register(&[acme()], "").unwrap();
}

// ============================================================================
//  NOTIFICATIONS
// ============================================================================

#[test]
fn test_events_follow_commits_once_per_service() {
    let db = user_db();
    let mut events = db.subscribe();

    db.register(&[desc("Svc", "x.a", 1, 0), desc("Svc", "x.a", 1, 1), desc("Svc", "x.b", 1, 0)], "").unwrap();
    let _ = db.register(&[desc("Bad", "x.a", 1, 0)], "");
    db.unregister("Svc", "").unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        RegistryEvent::ServiceAdded { name: "Svc".into(), scope: Scope::User }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        RegistryEvent::ServiceRemoved { name: "Svc".into(), scope: Scope::User }
    );
    assert!(events.try_recv().is_err());
}

#[test]
fn test_dropped_subscriber_is_pruned() {
    let db = user_db();
    drop(db.subscribe());
    let mut live = db.subscribe();
    db.register(&[acme()], "").unwrap();
    assert_eq!(live.try_recv().unwrap().service_name(), "Acme");
}

// ============================================================================
//  CROSS SCOPE
// ============================================================================

#[test]
fn test_scopes_are_independent() {
    let registry = ServiceRegistry::in_memory().unwrap();
    registry.register(&[acme()], "").unwrap();
    registry.register(&[acme().to_builder().scope(Scope::System).build()], "").unwrap();

    assert_eq!(registry.find(&Filter::new(), Scope::User).unwrap().len(), 1);
    assert_eq!(registry.find(&Filter::new(), Scope::System).unwrap().len(), 1);

    registry.unregister("Acme", Scope::User, "").unwrap();
    assert!(registry.find(&Filter::new(), Scope::User).unwrap().is_empty());
    assert_eq!(registry.find(&Filter::new(), Scope::System).unwrap()[0].scope(), Scope::System);

    let mixed = [desc("A", "x", 1, 0), desc("B", "y", 1, 0).to_builder().scope(Scope::System).build()];
    assert!(matches!(registry.register(&mixed, ""), Err(Error::InvalidDescriptor(_))));
}

#[test]
fn test_user_default_may_reference_system_entry() {
    let registry = ServiceRegistry::in_memory().unwrap();
    let system = desc("Sys", "x.api", 1, 0).to_builder().scope(Scope::System).build();
    registry.register(&[system.clone()], "").unwrap();
    registry.register(&[desc("Usr", "x.api", 3, 0)], "").unwrap();

    assert_eq!(registry.interface_default("x.api", Scope::User).unwrap().service_name(), "Usr");

    registry.set_default(&system, Scope::User).unwrap();
    let resolved = registry.interface_default("x.api", Scope::User).unwrap();
    assert_eq!(resolved.service_name(), "Sys");
    assert_eq!(resolved.scope(), Scope::System);

    // the System scope never sees User rows
    assert_eq!(registry.interface_default("x.api", Scope::System).unwrap().service_name(), "Sys");
    assert!(matches!(
        registry.set_default(&desc("Usr", "x.api", 3, 0), Scope::System),
        Err(Error::InvalidDescriptor(_))
    ));

    // the System store refuses to drop the id as foreign
    let id = registry.store(Scope::System).descriptor_id(&system).unwrap();
    assert!(matches!(
        registry.store(Scope::System).remove_foreign_default(&id),
        Err(Error::InvalidDescriptor(_))
    ));
    registry.store(Scope::User).remove_foreign_default(&id).unwrap();
    assert_eq!(registry.interface_default("x.api", Scope::User).unwrap().service_name(), "Usr");
}

#[test]
fn test_stale_system_default_falls_back_to_user_entries() {
    let registry = ServiceRegistry::in_memory().unwrap();
    let system = desc("Sys", "x.api", 1, 0).to_builder().scope(Scope::System).build();
    registry.register(&[system.clone()], "").unwrap();
    registry.register(&[desc("Usr", "x.api", 3, 0)], "").unwrap();
    registry.set_default(&system, Scope::User).unwrap();

    registry.unregister("Sys", Scope::System, "").unwrap();
    let resolved = registry.interface_default("x.api", Scope::User).unwrap();
    assert_eq!(resolved.service_name(), "Usr");
    assert_eq!(resolved.scope(), Scope::User);

    // nothing local left either
    registry.unregister("Usr", Scope::User, "").unwrap();
    assert_eq!(registry.interface_default("x.api", Scope::User), Err(Error::NotFound));
}

#[test]
fn test_set_default_by_name_crosses_into_system() {
    let registry = ServiceRegistry::in_memory().unwrap();
    registry
        .register(&[desc("Sys", "x.api", 2, 0).to_builder().scope(Scope::System).build()], "")
        .unwrap();

    registry.set_default_by_name("Sys", "x.api", Scope::User).unwrap();
    assert_eq!(registry.interface_default("x.api", Scope::User).unwrap().service_name(), "Sys");
    assert_eq!(
        registry.set_default_by_name("Nobody", "x.api", Scope::User),
        Err(Error::NotFound)
    );
}

#[test]
fn test_registry_subscription_merges_scopes() {
    let registry = ServiceRegistry::in_memory().unwrap();
    let mut events = registry.subscribe();
    registry.register(&[acme()], "").unwrap();
    registry.register(&[acme().to_builder().scope(Scope::System).build()], "").unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        RegistryEvent::ServiceAdded { name: "Acme".into(), scope: Scope::User }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        RegistryEvent::ServiceAdded { name: "Acme".into(), scope: Scope::System }
    );
}
