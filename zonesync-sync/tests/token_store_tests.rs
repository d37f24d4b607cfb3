use pretty_assertions::assert_eq;
use zonesync_sync::{ChangeTokenStore, FlagKey, TokenKey};
use zonesync_types::{ChangeToken, ZoneId};

fn zone() -> ZoneId {
    ZoneId::owned("NotesZone")
}

// ── Tokens ──────────────────────────────────────────────────────

#[test]
fn missing_token_reads_as_none() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    assert_eq!(store.get(&TokenKey::Database).unwrap(), None);
    assert_eq!(store.get(&TokenKey::Zone(zone())).unwrap(), None);
}

#[test]
fn set_overwrites_and_none_clears() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    let key = TokenKey::Zone(zone());
    store.set(&key, Some(&ChangeToken::from("T1"))).unwrap();
    store.set(&key, Some(&ChangeToken::from("T2"))).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(ChangeToken::from("T2")));

    store.set(&key, None).unwrap();
    assert_eq!(store.get(&key).unwrap(), None);
}

#[test]
fn scopes_are_independent() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    let other = TokenKey::Zone(ZoneId::owned("TagsZone"));
    store.set(&TokenKey::Database, Some(&ChangeToken::from("D"))).unwrap();
    store.set(&TokenKey::Zone(zone()), Some(&ChangeToken::from("Z"))).unwrap();

    assert_eq!(store.get(&TokenKey::Database).unwrap(), Some(ChangeToken::from("D")));
    assert_eq!(store.get(&other).unwrap(), None);
}

#[test]
fn binary_tokens_round_trip_unchanged() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    let token = ChangeToken::from_bytes(vec![0u8, 255, 10, 13, 0]);
    store.set(&TokenKey::Database, Some(&token)).unwrap();
    assert_eq!(store.get(&TokenKey::Database).unwrap(), Some(token));
}

// ── Durability ──────────────────────────────────────────────────

#[test]
fn tokens_and_flags_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.db");
    {
        let store = ChangeTokenStore::open(&path).unwrap();
        store
            .set(&TokenKey::Zone(zone()), Some(&ChangeToken::from("T2")))
            .unwrap();
        store.set_flag(&FlagKey::ZoneCreated(zone()), true).unwrap();
    }

    let store = ChangeTokenStore::open(&path).unwrap();
    assert_eq!(
        store.get(&TokenKey::Zone(zone())).unwrap(),
        Some(ChangeToken::from("T2"))
    );
    assert!(store.flag(&FlagKey::ZoneCreated(zone())).unwrap());
    assert!(!store.flag(&FlagKey::SubscriptionCreated(zone())).unwrap());
}

// ── Flags ───────────────────────────────────────────────────────

#[test]
fn reset_zone_clears_token_and_flags_of_that_zone_only() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    let tags = ZoneId::owned("TagsZone");
    for z in [zone(), tags.clone()] {
        store.set(&TokenKey::Zone(z.clone()), Some(&ChangeToken::from("T"))).unwrap();
        store.set_flag(&FlagKey::ZoneCreated(z.clone()), true).unwrap();
        store.set_flag(&FlagKey::SubscriptionCreated(z), true).unwrap();
    }
    store.set(&TokenKey::Database, Some(&ChangeToken::from("D"))).unwrap();

    store.reset_zone(&zone()).unwrap();

    assert_eq!(store.get(&TokenKey::Zone(zone())).unwrap(), None);
    assert!(!store.flag(&FlagKey::ZoneCreated(zone())).unwrap());
    assert!(!store.flag(&FlagKey::SubscriptionCreated(zone())).unwrap());
    assert!(store.flag(&FlagKey::ZoneCreated(tags.clone())).unwrap());
    assert!(store.get(&TokenKey::Zone(tags)).unwrap().is_some());
    assert!(store.get(&TokenKey::Database).unwrap().is_some());
}

#[test]
fn public_subscription_flags_are_per_type() {
    let store = ChangeTokenStore::open_in_memory().unwrap();
    store
        .set_flag(&FlagKey::PublicSubscriptionCreated("Note".into()), true)
        .unwrap();
    assert!(store.flag(&FlagKey::PublicSubscriptionCreated("Note".into())).unwrap());
    assert!(!store.flag(&FlagKey::PublicSubscriptionCreated("Tag".into())).unwrap());
}
