//! Typed UUID wrappers for compile-time type safety.
//!
//! `Id<T, V>` wraps a `uuid::Uuid` so that IDs belonging to different entities
//! (a `DeviceId`, a `JobId`) cannot be mixed up at compile time, even though
//! both are backed by the same representation at runtime.
//!
//! # Example
//!
//! ```
//! use netraven_core::id::Id;
//!
//! pub struct Device;
//! pub struct Job;
//!
//! pub type DeviceId = Id<Device>;
//! pub type JobId = Id<Job>;
//!
//! let device_id = DeviceId::new();
//! let job_id = JobId::new();
//!
//! // This would be a compile error:
//! // let wrong: JobId = device_id;
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// UUID version 7 marker (time-ordered UUIDs).
///
/// The default version for every entity ID in the catalog: V7's embedded
/// timestamp keeps primary-key index locality sane under high insert rates.
pub struct V7;

/// UUID version 4 marker (random UUIDs), used only where no natural
/// insertion order exists.
pub struct V4;

/// A typed wrapper around `Uuid`. `T` identifies the owning entity, `V` the
/// UUID version (defaults to `V7`).
#[repr(transparent)]
pub struct Id<T, V = V7>(Uuid, PhantomData<fn() -> (T, V)>);

impl<T> Id<T, V7> {
    /// Creates a new time-ordered V7 id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7(), PhantomData)
    }
}

impl<T> Default for Id<T, V7> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Id<T, V4> {
    /// Creates a new random V4 id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4(), PhantomData)
    }
}

impl<T> Default for Id<T, V4> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Id<T, V> {
    /// Wraps a raw `Uuid`, e.g. one just decoded from a database row.
    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    /// Unwraps the inner `Uuid`.
    #[inline]
    pub fn into_uuid(self) -> Uuid {
        self.0
    }

    /// Parses an id from its string form (e.g. a CLI argument or config value).
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a valid UUID.
    #[inline]
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?, PhantomData))
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// A nil (all-zero) id, used as a sentinel in tests and defaults.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil(), PhantomData)
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl<T, V> Clone for Id<T, V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Id<T, V> {}

impl<T, V> Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Id<{}>", std::any::type_name::<T>()))
            .field(&self.0)
            .finish()
    }
}

impl<T, V> Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T, V> PartialEq for Id<T, V> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T, V> Eq for Id<T, V> {}

impl<T, V> PartialOrd for Id<T, V> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, V> Ord for Id<T, V> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T, V> Hash for Id<T, V> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T, V> AsRef<Uuid> for Id<T, V> {
    #[inline]
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl<T, V> From<Uuid> for Id<T, V> {
    #[inline]
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T, V> From<Id<T, V>> for Uuid {
    #[inline]
    fn from(id: Id<T, V>) -> Self {
        id.0
    }
}

impl<T, V> FromStr for Id<T, V> {
    type Err = uuid::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T, V> Serialize for Id<T, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T, V> Deserialize<'de> for Id<T, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

// ============================================================================
// sqlx support
// ============================================================================

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};

impl<T, V> Type<Postgres> for Id<T, V> {
    fn type_info() -> PgTypeInfo {
        <Uuid as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Uuid as Type<Postgres>>::compatible(ty)
    }
}

impl<T, V> PgHasArrayType for Id<T, V> {
    fn array_type_info() -> PgTypeInfo {
        <Uuid as PgHasArrayType>::array_type_info()
    }
}

impl<T, V> Encode<'_, Postgres> for Id<T, V> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <Uuid as Encode<Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<T, V> Decode<'_, Postgres> for Id<T, V> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        <Uuid as Decode<Postgres>>::decode(value).map(Self::from_uuid)
    }
}

// ============================================================================
// Entity marker types
// ============================================================================

pub struct DeviceMarker;
pub struct TagMarker;
pub struct CredentialMarker;
pub struct JobMarker;
pub struct ScheduleMarker;
pub struct JobRunMarker;
pub struct SubResultMarker;
pub struct SnapshotMarker;
pub struct LogEntryMarker;
pub struct EncryptionKeyMarker;

pub type DeviceId = Id<DeviceMarker>;
pub type TagId = Id<TagMarker>;
pub type CredentialId = Id<CredentialMarker>;
pub type JobId = Id<JobMarker>;
pub type ScheduleId = Id<ScheduleMarker>;
pub type JobRunId = Id<JobRunMarker>;
pub type SubResultId = Id<SubResultMarker>;
pub type SnapshotId = Id<SnapshotMarker>;
pub type LogEntryId = Id<LogEntryMarker>;
pub type EncryptionKeyId = Id<EncryptionKeyMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing;
    type ThingId = Id<Thing>;

    #[test]
    fn new_creates_unique_ids() {
        assert_ne!(ThingId::new(), ThingId::new());
    }

    #[test]
    fn parse_and_display_roundtrip() {
        let id = ThingId::new();
        let parsed = ThingId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        assert_eq!(ThingId::from_uuid(uuid).into_uuid(), uuid);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ThingId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(id, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn nil_is_nil() {
        assert!(ThingId::nil().is_nil());
    }

    #[test]
    fn usable_as_hash_map_key() {
        use std::collections::HashMap;
        let mut map: HashMap<ThingId, &str> = HashMap::new();
        let id = ThingId::new();
        map.insert(id, "test");
        assert_eq!(map.get(&id), Some(&"test"));
    }

    #[test]
    fn v7_ids_are_time_ordered() {
        let id1 = ThingId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = ThingId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn debug_includes_type_name() {
        let id = ThingId::new();
        assert!(format!("{:?}", id).contains("Thing"));
    }
}
