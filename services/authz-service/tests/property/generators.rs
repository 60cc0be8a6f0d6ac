//! Proptest Generators
//!
//! Shared generators for property-based tests.

use proptest::prelude::*;

/// Subject ids as issued by the identity provider.
pub fn arb_subject() -> impl Strategy<Value = String> {
    prop_oneof![
        "auth0\\|[a-z0-9]{6,24}",
        "google-oauth2\\|[0-9]{10,21}",
        "[a-z][a-z0-9-]{2,16}",
    ]
}

/// Role lists, possibly with stray whitespace and duplicates.
pub fn arb_roles() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![
            Just("editor".to_string()),
            Just("moderator".to_string()),
            Just("viewer".to_string()),
            Just("user_manager".to_string()),
            Just(" support ".to_string()),
            "[a-z_]{3,12}".prop_filter("admin is generated explicitly", |r| r != "admin"),
        ],
        0..5,
    )
}

/// Role lists that always carry the admin role in some casing.
pub fn arb_roles_with_admin() -> impl Strategy<Value = Vec<String>> {
    (arb_roles(), prop_oneof![Just("admin"), Just("Admin"), Just("ADMIN")]).prop_map(
        |(mut roles, admin)| {
            roles.push(admin.to_string());
            roles
        },
    )
}

/// Operation names in mixed case, including unknown verbs.
pub fn arb_operation() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("get".to_string()),
        Just("HEAD".to_string()),
        Just("POST".to_string()),
        Just("Put".to_string()),
        Just("PATCH".to_string()),
        Just("write".to_string()),
        Just("DELETE".to_string()),
        Just("OPTIONS".to_string()),
        Just("TRACE".to_string()),
    ]
}

/// Write-class operation names.
pub fn arb_write_operation() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("POST".to_string()),
        Just("put".to_string()),
        Just("PATCH".to_string()),
        Just("WRITE".to_string()),
        Just("Delete".to_string()),
    ]
}

/// Resource paths outside every public prefix.
pub fn arb_protected_path() -> impl Strategy<Value = String> {
    let family = prop_oneof![
        Just("users"),
        Just("posts"),
        Just("comments"),
        Just("likes"),
        Just("billing"),
        Just("settings"),
    ];
    (
        any::<bool>(),
        family,
        prop::collection::vec("[a-z0-9]{1,10}", 0..3),
    )
        .prop_map(|(with_api, family, rest)| {
            let mut path = String::new();
            if with_api {
                path.push_str("/api");
            }
            path.push('/');
            path.push_str(family);
            for segment in rest {
                path.push('/');
                path.push_str(&segment);
            }
            path
        })
}

/// Paths that climb out of their prefix with a dot segment.
pub fn arb_traversal_path() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("/api/users"), Just("/api/health"), Just("/users"), Just("/api/posts")],
        prop_oneof![Just(".."), Just(".")],
        "[a-z0-9]{1,10}",
    )
        .prop_map(|(prefix, dots, tail)| format!("{prefix}/{dots}/{tail}"))
}

/// Correlation ids: uuids and short opaque strings.
pub fn arb_correlation_id() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
        "[a-zA-Z0-9]{1,16}",
    ]
}

/// Sensitive content patterns.
pub fn arb_sensitive_content() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("password=secret123".to_string()),
        Just("Bearer eyJhbGciOiJSUzI1NiJ9".to_string()),
        Just("credential: admin:password".to_string()),
        Just("private_key: -----BEGIN RSA-----".to_string()),
        Just("Authorization header rejected".to_string()),
        "[a-zA-Z0-9_]{5,20}".prop_map(|s| format!("password={s}")),
    ]
}
