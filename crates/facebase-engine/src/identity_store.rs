//! In-memory mirror of the identities held by the database.
//!
//! Every mutation is persisted first and only then applied to the cache, so a
//! failed write leaves the cache matching the database.

use facebase_core::types::{FULL_NAME_KEY, NAME_KEY, UUID_KEY};
use facebase_core::{Attributes, Identity};
use facebase_db::{DbError, FaceDb};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub(crate) struct IdentityStore {
    cache: BTreeMap<i64, Identity>,
}

impl IdentityStore {
    /// Warm the cache from the database. A failed read leaves it empty.
    pub fn load(db: &dyn FaceDb) -> Self {
        match db.identities() {
            Ok(identities) => Self {
                cache: identities.into_iter().map(|i| (i.id, i)).collect(),
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to load identities");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn all(&self) -> Vec<Identity> {
        self.cache.values().cloned().collect()
    }

    pub fn get(&self, id: i64) -> Option<Identity> {
        self.cache.get(&id).cloned()
    }

    /// First identity, by id, holding the exact `(key, value)` pair.
    pub fn find_by_attribute(&self, key: &str, value: &str) -> Option<Identity> {
        self.cache
            .values()
            .find(|identity| identity.attributes.contains(key, value))
            .cloned()
    }

    /// Resolve candidate attributes to one identity.
    ///
    /// A supplied uuid decides alone: it either matches or nothing does.
    /// Otherwise full names are tried, then names, then every other key in
    /// the order the candidates list them.
    pub fn find(&self, candidates: &Attributes) -> Option<Identity> {
        if let Some(uuid) = candidates.get(UUID_KEY) {
            return self.find_by_attribute(UUID_KEY, uuid);
        }

        let ranked = [FULL_NAME_KEY, NAME_KEY];
        let others = candidates.keys().into_iter().filter(|k| !ranked.contains(k));

        for key in ranked.into_iter().chain(others) {
            for value in candidates.get_all(key) {
                if let Some(identity) = self.find_by_attribute(key, value) {
                    return Some(identity);
                }
            }
        }
        None
    }

    /// Persist a new identity carrying `attributes` and a freshly generated uuid.
    pub fn create(&mut self, db: &dyn FaceDb, mut attributes: Attributes) -> Result<Identity, DbError> {
        attributes.set(UUID_KEY, uuid::Uuid::new_v4().to_string());
        let id = db.add_identity(&attributes)?;
        let identity = Identity::new(id, attributes);
        self.cache.insert(id, identity.clone());

        tracing::info!(id, uuid = ?identity.uuid(), "identity added");
        Ok(identity)
    }

    /// Append `attributes` to a known identity. `Ok(None)` for unknown ids.
    /// Uuid pairs are dropped; an identity keeps the uuid it was created with.
    pub fn add_attributes(
        &mut self,
        db: &dyn FaceDb,
        id: i64,
        attributes: &Attributes,
    ) -> Result<Option<Identity>, DbError> {
        let Some(mut identity) = self.get(id) else {
            return Ok(None);
        };
        let mut attributes = attributes.clone();
        if attributes.contains_key(UUID_KEY) {
            tracing::warn!(id, "uuid attribute ignored; uuids cannot be changed");
            attributes.remove(UUID_KEY);
        }
        identity.attributes.merge(&attributes);
        self.store(db, identity).map(Some)
    }

    /// Replace the attributes of a known identity. The uuid is kept.
    pub fn set_attributes(
        &mut self,
        db: &dyn FaceDb,
        id: i64,
        mut attributes: Attributes,
    ) -> Result<Option<Identity>, DbError> {
        let Some(mut identity) = self.get(id) else {
            return Ok(None);
        };

        attributes.remove(UUID_KEY);
        if let Some(uuid) = identity.uuid() {
            attributes.push(UUID_KEY, uuid);
        }
        identity.attributes = attributes;
        self.store(db, identity).map(Some)
    }

    /// Remove a known identity. Returns whether it existed.
    pub fn remove(&mut self, db: &dyn FaceDb, id: i64) -> Result<bool, DbError> {
        if !self.cache.contains_key(&id) {
            return Ok(false);
        }
        db.delete_identity(id)?;
        self.cache.remove(&id);
        tracing::info!(id, "identity deleted");
        Ok(true)
    }

    fn store(&mut self, db: &dyn FaceDb, identity: Identity) -> Result<Identity, DbError> {
        db.update_identity(&identity)?;
        self.cache.insert(identity.id, identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facebase_db::SqliteFaceDb;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    fn store_with(db: &SqliteFaceDb, people: &[&[(&str, &str)]]) -> IdentityStore {
        for pairs in people {
            db.add_identity(&attrs(pairs)).unwrap();
        }
        IdentityStore::load(db)
    }

    #[test]
    fn test_load_warms_cache() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let store = store_with(&db, &[&[("name", "Ann")], &[("name", "Bob")]]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(2).unwrap().attributes.get("name"), Some("Bob"));
        assert!(store.get(3).is_none());
    }

    #[test]
    fn test_create_generates_uuid() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let mut store = IdentityStore::default();
        let ann = store.create(&db, attrs(&[("name", "Ann")])).unwrap();
        let bob = store.create(&db, attrs(&[("name", "Bob")])).unwrap();

        assert!(ann.uuid().is_some());
        assert_ne!(ann.uuid(), bob.uuid());
        assert_eq!(store.get(ann.id), Some(ann.clone()));
        // Persisted, not only cached.
        assert_eq!(IdentityStore::load(&db).get(ann.id), Some(ann));
    }

    #[test]
    fn test_find_uuid_decides_alone() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let store = store_with(&db, &[&[("name", "Ann"), ("uuid", "u1")]]);

        assert_eq!(store.find(&attrs(&[("uuid", "u1")])).unwrap().id, 1);
        assert!(store.find(&attrs(&[("uuid", "u2"), ("name", "Ann")])).is_none());
        assert_eq!(store.find(&attrs(&[("name", "Ann")])).unwrap().id, 1);
    }

    #[test]
    fn test_find_priority() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let store = store_with(
            &db,
            &[
                &[("name", "Ann")],
                &[("fullName", "Ann Smith")],
                &[("email", "ann@example.org")],
            ],
        );

        let candidates = attrs(&[
            ("email", "ann@example.org"),
            ("name", "Ann"),
            ("fullName", "Ann Smith"),
        ]);
        assert_eq!(store.find(&candidates).unwrap().id, 2);

        let candidates = attrs(&[("email", "ann@example.org"), ("name", "Ann")]);
        assert_eq!(store.find(&candidates).unwrap().id, 1);

        let candidates = attrs(&[("email", "ann@example.org"), ("name", "Nobody")]);
        assert_eq!(store.find(&candidates).unwrap().id, 3);
    }

    #[test]
    fn test_find_matches_exact_pairs_only() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let store = store_with(&db, &[&[("name", "Ann"), ("city", "Oslo")]]);
        assert!(store.find(&attrs(&[("name", "Oslo")])).is_none());
        assert!(store.find_by_attribute("city", "Ann").is_none());
    }

    #[test]
    fn test_add_and_set_attributes() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let mut store = IdentityStore::default();
        let ann = store.create(&db, attrs(&[("name", "Ann")])).unwrap();
        let uuid = ann.uuid().unwrap().to_string();

        let ann = store
            .add_attributes(&db, ann.id, &attrs(&[("name", "Annie")]))
            .unwrap()
            .unwrap();
        assert_eq!(ann.attributes.get_all("name").count(), 2);

        let ann = store
            .set_attributes(&db, ann.id, attrs(&[("fullName", "Ann Smith"), ("uuid", "forged")]))
            .unwrap()
            .unwrap();
        assert!(!ann.attributes.contains_key("name"));
        assert_eq!(ann.uuid(), Some(uuid.as_str()));
        assert_eq!(IdentityStore::load(&db).get(ann.id), Some(ann));
    }

    #[test]
    fn test_added_uuid_is_ignored() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let mut store = IdentityStore::default();
        let ann = store.create(&db, attrs(&[("name", "Ann")])).unwrap();
        let uuid = ann.uuid().unwrap().to_string();

        let ann = store
            .add_attributes(&db, ann.id, &attrs(&[("uuid", "forged"), ("tag", "family")]))
            .unwrap()
            .unwrap();
        assert_eq!(ann.attributes.get_all("uuid").collect::<Vec<_>>(), vec![uuid.as_str()]);
        assert!(ann.attributes.contains("tag", "family"));
        assert!(store.find(&attrs(&[("uuid", "forged")])).is_none());
    }

    #[test]
    fn test_unknown_ids_are_no_ops() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let mut store = IdentityStore::default();
        assert!(store.add_attributes(&db, 9, &attrs(&[("a", "b")])).unwrap().is_none());
        assert!(store.set_attributes(&db, 9, Attributes::new()).unwrap().is_none());
        assert!(!store.remove(&db, 9).unwrap());
        assert!(db.identities().unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let mut store = IdentityStore::default();
        let ann = store.create(&db, attrs(&[("name", "Ann")])).unwrap();
        assert!(store.remove(&db, ann.id).unwrap());
        assert!(store.get(ann.id).is_none());
        assert!(db.identities().unwrap().is_empty());
    }
}
