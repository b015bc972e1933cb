use std::collections::HashSet;

use crate::*;
use crate::document::Error as DocError;

fn acme() -> Descriptor {
    Descriptor::builder("Acme", "com.acme.sysinfo")
        .version(2, 3)
        .location("acme_service")
        .service_type(ServiceType::InterProcess)
        .capability("ReadUserData")
        .custom_attribute("vendor", "acme")
        .custom_attribute("flavour", "")
        .service_description("Acme system services")
        .interface_description("System information")
        .build()
}

fn plain(service: &str, interface: &str, major: i32, minor: i32) -> Descriptor {
    Descriptor::builder(service, interface).version(major, minor).build()
}

// ============================================================================
//  DESCRIPTOR
// ============================================================================

#[test]
fn test_validity() {
    assert!(acme().is_valid());
    assert!(!Descriptor::builder("", "x").version(1, 0).build().is_valid());
    assert!(!Descriptor::builder("s", "").version(1, 0).build().is_valid());
    assert!(!Descriptor::builder("s", "x").build().is_valid());
    assert!(!Descriptor::default().is_valid());
}

#[test]
fn test_identity_is_case_insensitive() {
    let a = plain("Acme", "com.acme.SysInfo", 1, 0);
    let b = Descriptor::builder("ACME", "com.acme.sysinfo")
        .version(1, 0)
        .location("elsewhere")
        .build();
    assert_eq!(a, b);

    let set: HashSet<Descriptor> = [a.clone(), b].into_iter().collect();
    assert_eq!(set.len(), 1);

    assert_ne!(a, plain("Acme", "com.acme.sysinfo", 1, 1));
}

#[test]
fn test_capabilities_are_an_ordered_set() {
    let d = Descriptor::builder("s", "i")
        .capabilities(["b", "a", "b", "c", "a"])
        .build();
    assert_eq!(d.capabilities(), ["b", "a", "c"]);
}

#[test]
fn test_record_roundtrip_preserves_every_field() {
    let original = acme().to_builder().scope(Scope::System).build();
    let record = DescriptorRecord::from(&original);

    assert_eq!(record.major, "2");
    assert_eq!(record.scope, "system");
    assert_eq!(record.attributes["capabilities"], "ReadUserData");
    assert_eq!(record.attributes["service_type"], "ipc");

    let json = serde_json::to_string(&record).unwrap();
    let back: DescriptorRecord = serde_json::from_str(&json).unwrap();
    let restored = Descriptor::try_from(back).unwrap();
    assert!(restored.same_fields(&original));
}

#[test]
fn test_record_rejects_bad_scope() {
    let mut record = DescriptorRecord::from(&acme());
    record.scope = "galaxy".into();
    assert!(Descriptor::try_from(record).is_err());
}

// ============================================================================
//  FILTER
// ============================================================================

#[test]
fn test_empty_filter_matches_everything_but_loadable() {
    let d = acme();
    assert!(Filter::new().matches(&d));
    assert!(!Filter::new().capabilities(CapabilityMatch::MatchLoadable, Vec::<String>::new()).matches(&d));
    assert!(Filter::new().capabilities(CapabilityMatch::MatchMinimum, Vec::<String>::new()).matches(&d));
}

#[test]
fn test_service_and_interface_names_ignore_case() {
    let d = acme();
    assert!(Filter::new().service("acme").matches(&d));
    assert!(Filter::new().interface("COM.ACME.SYSINFO").matches(&d));
    assert!(!Filter::new().service("other").matches(&d));
    assert!(Filter::new().service("").matches(&d));
}

#[test]
fn test_version_rules() {
    let d12 = plain("s", "i", 1, 2);
    let d13 = plain("s", "i", 1, 3);
    let d20 = plain("s", "i", 2, 0);
    let d11 = plain("s", "i", 1, 11);

    let exact = Filter::new().interface_version("i", "1.2", VersionMatch::Exact);
    assert!(exact.matches(&d12));
    assert!(!exact.matches(&d13));
    assert!(!exact.matches(&d20));

    let minimum = Filter::new().interface_version("i", "1.2", VersionMatch::Minimum);
    assert!(minimum.matches(&d12));
    assert!(minimum.matches(&d13));
    assert!(minimum.matches(&d20));
    assert!(minimum.matches(&d11));
    assert!(!minimum.matches(&plain("s", "i", 1, 1)));
    assert!(!minimum.matches(&plain("s", "i", 0, 9)));
}

#[test]
fn test_unparsable_version_is_wildcard() {
    let ds = [plain("s", "i", 0, 1), plain("s", "i", 7, 7)];
    for version in ["", "x", "1", "1.2.3"] {
        for rule in [VersionMatch::Exact, VersionMatch::Minimum] {
            let f = Filter::new().interface_version("i", version, rule);
            assert!(f.version_constraint().is_none());
            assert!(ds.iter().all(|d| f.matches(d)), "{version:?} {rule:?}");
        }
    }
}

#[test]
fn test_capability_rules() {
    let none = plain("s", "i", 1, 0);
    let one = acme();
    let two = acme().to_builder().capability("WriteUserData").build();

    let loadable = Filter::new().capabilities(CapabilityMatch::MatchLoadable, ["ReadUserData"]);
    assert!(loadable.matches(&none));
    assert!(loadable.matches(&one));
    assert!(!loadable.matches(&two));

    let minimum = Filter::new().capabilities(CapabilityMatch::MatchMinimum, ["ReadUserData"]);
    assert!(!minimum.matches(&none));
    assert!(minimum.matches(&one));
    assert!(minimum.matches(&two));
}

#[test]
fn test_custom_attribute_empty_value_is_distinct_from_unset() {
    let d = acme();
    assert!(Filter::new().custom_attribute("flavour", "").matches(&d));
    assert!(!Filter::new().custom_attribute("flavour", "vanilla").matches(&d));
    assert!(!Filter::new().custom_attribute("missing", "").matches(&d));
    assert!(Filter::new().custom_attribute("vendor", "acme").matches(&d));
}

// ============================================================================
//  DOCUMENT
// ============================================================================

const ACME_DOC: &str = r#"
version = "1.1"

[service]
name = "Acme"
ipcaddress = "acme_service"
description = "Acme system services"

[[interface]]
name = "com.acme.sysinfo"
version = "2.3"
description = "System information"
capabilities = ["ReadUserData"]

[interface.attributes]
vendor = "acme"

[[interface]]
name = "com.acme.battery"
version = "1.0"
"#;

#[test]
fn test_document_parses_into_descriptors() {
    let meta = ServiceMetadata::parse_str(ACME_DOC).unwrap();
    assert_eq!(meta.name, "Acme");
    assert_eq!(meta.service_type, ServiceType::InterProcess);
    assert!(meta.warnings.is_empty());

    let ds = meta.descriptors(Scope::System);
    assert_eq!(ds.len(), 2);
    assert_eq!(ds[0].version(), Version::new(2, 3));
    assert_eq!(ds[0].capabilities(), ["ReadUserData"]);
    assert_eq!(ds[0].custom_attribute("vendor"), Some("acme"));
    assert_eq!(ds[0].location(), "acme_service");
    assert!(ds.iter().all(|d| d.scope() == Scope::System && d.is_valid()));
}

#[test]
fn test_document_errors() {
    let cases: Vec<(&str, DocError)> = vec![
        ("[[interface]]\nname='i'\nversion='1.0'", DocError::MissingService),
        ("[service]\nfilepath='p'\n[[interface]]\nname='i'\nversion='1.0'", DocError::MissingServiceName),
        ("[service]\nname='s'\n[[interface]]\nname='i'\nversion='1.0'", DocError::MissingLocation),
        (
            "version='1.1'\n[service]\nname='s'\nfilepath='p'\nipcaddress='a'\n[[interface]]\nname='i'\nversion='1.0'",
            DocError::MultipleLocations,
        ),
        ("[service]\nname='s'\nipcaddress='a'\n[[interface]]\nname='i'\nversion='1.0'", DocError::UnsupportedIpc),
        ("[service]\nname='s'\nfilepath='p'", DocError::MissingInterfaces),
        ("[service]\nname='s'\nfilepath='p'\n[[interface]]\nversion='1.0'", DocError::MissingInterfaceName),
        (
            "[service]\nname='s'\nfilepath='p'\n[[interface]]\nname='i'",
            DocError::MissingInterfaceVersion { interface: "i".into() },
        ),
        (
            "[service]\nname='s'\nfilepath='p'\n[[interface]]\nname='i'\nversion='1.0.1'",
            DocError::InvalidVersion { interface: "i".into(), version: "1.0.1".into() },
        ),
        (
            "[service]\nname='s'\nfilepath='p'\n[[interface]]\nname='i'\nversion='1.0'\n[[interface]]\nname='I'\nversion='1.0'",
            DocError::DuplicateInterface { interface: "I".into(), version: Version::new(1, 0) },
        ),
        (
            "[service]\nname='s'\nfilepath='p'\n[[interface]]\nname='i'\nversion='1.0'\n[interface.attributes]\n' ' = 'x'",
            DocError::InvalidCustomAttribute { interface: "i".into() },
        ),
        ("version='2.0'\n[service]\nname='s'", DocError::UnsupportedDocumentVersion("2.0".into())),
    ];

    for (input, expected) in cases {
        assert_eq!(ServiceMetadata::parse_str(input), Err(expected), "input:\n{input}");
    }
}

#[test]
fn test_document_syntax_error_and_warnings() {
    assert!(matches!(ServiceMetadata::parse_str("[service"), Err(DocError::Syntax(_))));
    assert!(matches!(ServiceMetadata::parse_bytes(&[0xff, 0xfe]), Err(DocError::Syntax(_))));

    let meta = ServiceMetadata::parse_str("colour='red'\n[service]\nname='s'\nfilepath='p'\n[[interface]]\nname='i'\nversion='1.0'")
        .unwrap();
    assert_eq!(meta.warnings, vec!["unknown key `colour`".to_string()]);
    assert_eq!(meta.service_type, ServiceType::Plugin);
}
