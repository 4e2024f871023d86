//! RocksDB-backed coupon pool and claim ledger.
//!
//! Column families:
//!
//! | CF               | key                                   | value            |
//! |------------------|---------------------------------------|------------------|
//! | `coupons`        | code                                  | `StoredCoupon`   |
//! | `coupon_order`   | creation seq (BE)                     | code             |
//! | `available`      | creation seq (BE)                     | code             |
//! | `claims`         | code                                  | `StoredClaim`    |
//! | `session_index`  | len(session) ‖ session ‖ instant ‖ code | code           |
//! | `address_index`  | len(address) ‖ address ‖ instant ‖ code | code           |
//! | `metadata`       | name                                  | u64 (LE)         |
//!
//! Every mutation runs inside a pessimistic transaction. The claim
//! transition reads the coupon row with `get_for_update_cf`, which holds the
//! row lock until commit, so the "still unclaimed" check and the write are a
//! single conditional update as far as concurrent writers are concerned.
//! The `available` index is maintained in the same transactions, which keeps
//! lookup O(1) and selection oldest-first.

use std::path::Path;

use chrono::DateTime;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, Options,
    SingleThreaded, TransactionDB, TransactionDBOptions,
};
use tracing::debug;

use coupon_core::error::{LedgerError, PoolError, StoreError};
use coupon_core::traits::{ClaimLedger, CouponPool};
use coupon_core::types::{
    normalize_code, ClaimRecord, ClientAddress, Coupon, CouponClaim, SessionKey, Timestamp,
};

// --- Column family names ---

const CF_COUPONS: &str = "coupons";
const CF_COUPON_ORDER: &str = "coupon_order";
const CF_AVAILABLE: &str = "available";
const CF_CLAIMS: &str = "claims";
const CF_SESSION_INDEX: &str = "session_index";
const CF_ADDRESS_INDEX: &str = "address_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_COUPONS,
    CF_COUPON_ORDER,
    CF_AVAILABLE,
    CF_CLAIMS,
    CF_SESSION_INDEX,
    CF_ADDRESS_INDEX,
    CF_METADATA,
];

// --- Metadata keys ---

const META_NEXT_SEQ: &[u8] = b"next_coupon_seq";

/// Encoded length of an instant inside index keys.
const INSTANT_KEY_LEN: usize = 12;

/// Exact instant: whole seconds plus sub-second nanos. Nothing is rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct StoredInstant {
    secs: i64,
    nanos: u32,
}

impl StoredInstant {
    fn from_timestamp(at: Timestamp) -> Self {
        Self {
            secs: at.timestamp(),
            nanos: at.timestamp_subsec_nanos(),
        }
    }

    fn to_timestamp(self) -> Result<Timestamp, StoreError> {
        DateTime::from_timestamp(self.secs, self.nanos)
            .ok_or_else(|| StoreError::Codec(format!("timestamp out of range: {}s", self.secs)))
    }

    /// Big-endian, sign-flipped so byte order matches chronological order.
    fn sort_key(self) -> [u8; INSTANT_KEY_LEN] {
        let mut key = [0u8; INSTANT_KEY_LEN];
        key[0..8].copy_from_slice(&((self.secs as u64) ^ (1 << 63)).to_be_bytes());
        key[8..12].copy_from_slice(&self.nanos.to_be_bytes());
        key
    }
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct StoredMark {
    by: String,
    at: StoredInstant,
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct StoredCoupon {
    code: String,
    seq: u64,
    active: bool,
    created_at: StoredInstant,
    claim: Option<StoredMark>,
}

impl StoredCoupon {
    fn is_available(&self) -> bool {
        self.active && self.claim.is_none()
    }

    fn into_coupon(self) -> Result<Coupon, StoreError> {
        let claim = match self.claim {
            Some(mark) => Some(CouponClaim {
                by: parse_address(&mark.by)?,
                at: mark.at.to_timestamp()?,
            }),
            None => None,
        };
        Ok(Coupon {
            code: self.code,
            active: self.active,
            claim,
            created_at: self.created_at.to_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct StoredClaim {
    coupon_code: String,
    address: String,
    session: String,
    claimed_at: StoredInstant,
}

impl StoredClaim {
    fn from_record(record: &ClaimRecord) -> Self {
        Self {
            coupon_code: record.coupon_code.clone(),
            address: record.address.as_str().to_string(),
            session: record.session.as_str().to_string(),
            claimed_at: StoredInstant::from_timestamp(record.claimed_at),
        }
    }

    fn into_record(self) -> Result<ClaimRecord, StoreError> {
        Ok(ClaimRecord {
            address: parse_address(&self.address)?,
            session: SessionKey::parse(&self.session)
                .ok_or_else(|| StoreError::Codec("empty session in claim record".into()))?,
            claimed_at: self.claimed_at.to_timestamp()?,
            coupon_code: self.coupon_code,
        })
    }
}

/// RocksDB-backed [`CouponPool`] and [`ClaimLedger`].
pub struct RocksStore {
    db: TransactionDB<SingleThreaded>,
}

impl RocksStore {
    /// Open or create a database at the given path, creating any missing
    /// column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = TransactionDB::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            path.as_ref(),
            cf_descriptors,
        )
        .map_err(storage_err)?;

        debug!(path = %path.as_ref().display(), "coupon store opened");
        Ok(Self { db })
    }

    // --- Internal helpers ---

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Storage(format!("missing column family: {name}")))
    }

    fn load_coupon(&self, code: &str) -> Result<Option<StoredCoupon>, StoreError> {
        let cf = self.cf_handle(CF_COUPONS)?;
        self.db
            .get_cf(cf, code.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode::<StoredCoupon>(&bytes))
            .transpose()
    }

    /// Most recent claim under a length-prefixed index key.
    ///
    /// Index keys sort by instant within a prefix, so the last key at or
    /// below `prefix ‖ 0xFF..` is the newest claim for that prefix.
    fn latest_in_index(&self, cf_name: &str, key: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = index_prefix(key);
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; INSTANT_KEY_LEN]);

        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        let Some(item) = iter.next() else {
            return Ok(None);
        };
        let (index_key, code) = item.map_err(storage_err)?;
        if !index_key.starts_with(&prefix) {
            return Ok(None);
        }

        let code = std::str::from_utf8(&code)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        self.by_coupon(code)?
            .map(Some)
            .ok_or_else(|| StoreError::Inconsistent(format!("index points at missing claim {code}")))
    }
}

impl CouponPool for RocksStore {
    fn find_available(&self) -> Result<Option<Coupon>, StoreError> {
        let cf = self.cf_handle(CF_AVAILABLE)?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, code) = item.map_err(storage_err)?;
            let code = std::str::from_utf8(&code).map_err(|e| StoreError::Codec(e.to_string()))?;
            // The index may be read while a claim is committing; re-check the row.
            match self.load_coupon(code)? {
                Some(stored) if stored.is_available() => return stored.into_coupon().map(Some),
                _ => continue,
            }
        }
        Ok(None)
    }

    fn mark_claimed(&self, code: &str, by: &ClientAddress, at: Timestamp) -> Result<Coupon, PoolError> {
        let cf_coupons = self.cf_handle(CF_COUPONS)?;
        let cf_available = self.cf_handle(CF_AVAILABLE)?;

        let txn = self.db.transaction();
        let bytes = txn
            .get_for_update_cf(cf_coupons, code.as_bytes(), true)
            .map_err(|e| contended(e, code))?
            .ok_or_else(|| PoolError::NotFound(code.to_string()))?;
        let mut stored: StoredCoupon = decode(&bytes)?;
        if !stored.is_available() {
            return Err(PoolError::Conflict(code.to_string()));
        }

        stored.claim = Some(StoredMark {
            by: by.as_str().to_string(),
            at: StoredInstant::from_timestamp(at),
        });
        txn.put_cf(cf_coupons, code.as_bytes(), encode(&stored)?)
            .map_err(storage_err)?;
        txn.delete_cf(cf_available, stored.seq.to_be_bytes())
            .map_err(storage_err)?;
        txn.commit().map_err(|e| contended(e, code))?;

        Ok(stored.into_coupon()?)
    }

    fn toggle_active(&self, code: &str) -> Result<Coupon, PoolError> {
        let cf_coupons = self.cf_handle(CF_COUPONS)?;
        let cf_available = self.cf_handle(CF_AVAILABLE)?;

        let txn = self.db.transaction();
        let bytes = txn
            .get_for_update_cf(cf_coupons, code.as_bytes(), true)
            .map_err(storage_err)?
            .ok_or_else(|| PoolError::NotFound(code.to_string()))?;
        let mut stored: StoredCoupon = decode(&bytes)?;
        stored.active = !stored.active;

        txn.put_cf(cf_coupons, code.as_bytes(), encode(&stored)?)
            .map_err(storage_err)?;
        if stored.is_available() {
            txn.put_cf(cf_available, stored.seq.to_be_bytes(), code.as_bytes())
                .map_err(storage_err)?;
        } else {
            txn.delete_cf(cf_available, stored.seq.to_be_bytes())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        Ok(stored.into_coupon()?)
    }

    fn insert(&self, code: &str, created_at: Timestamp) -> Result<Coupon, PoolError> {
        let code = normalize_code(code).ok_or_else(|| PoolError::InvalidCode(code.to_string()))?;
        let cf_coupons = self.cf_handle(CF_COUPONS)?;
        let cf_order = self.cf_handle(CF_COUPON_ORDER)?;
        let cf_available = self.cf_handle(CF_AVAILABLE)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(cf_coupons, code.as_bytes(), true)
            .map_err(storage_err)?
            .is_some()
        {
            return Err(PoolError::DuplicateCode(code));
        }

        let seq = match txn
            .get_for_update_cf(cf_meta, META_NEXT_SEQ, true)
            .map_err(storage_err)?
        {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        };

        let stored = StoredCoupon {
            code: code.clone(),
            seq,
            active: true,
            created_at: StoredInstant::from_timestamp(created_at),
            claim: None,
        };
        txn.put_cf(cf_meta, META_NEXT_SEQ, (seq + 1).to_le_bytes())
            .map_err(storage_err)?;
        txn.put_cf(cf_coupons, code.as_bytes(), encode(&stored)?)
            .map_err(storage_err)?;
        txn.put_cf(cf_order, seq.to_be_bytes(), code.as_bytes())
            .map_err(storage_err)?;
        txn.put_cf(cf_available, seq.to_be_bytes(), code.as_bytes())
            .map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;

        Ok(stored.into_coupon()?)
    }

    fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        self.load_coupon(code)?.map(StoredCoupon::into_coupon).transpose()
    }

    fn list(&self) -> Result<Vec<Coupon>, StoreError> {
        let cf = self.cf_handle(CF_COUPON_ORDER)?;
        let mut coupons = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, code) = item.map_err(storage_err)?;
            let code = std::str::from_utf8(&code).map_err(|e| StoreError::Codec(e.to_string()))?;
            let stored = self
                .load_coupon(code)?
                .ok_or_else(|| StoreError::Inconsistent(format!("order index points at missing coupon {code}")))?;
            coupons.push(stored.into_coupon()?);
        }
        Ok(coupons)
    }
}

impl ClaimLedger for RocksStore {
    fn append(&self, record: &ClaimRecord) -> Result<(), LedgerError> {
        let cf_claims = self.cf_handle(CF_CLAIMS)?;
        let cf_session = self.cf_handle(CF_SESSION_INDEX)?;
        let cf_address = self.cf_handle(CF_ADDRESS_INDEX)?;
        let code = record.coupon_code.as_bytes();

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(cf_claims, code, true)
            .map_err(storage_err)?
            .is_some()
        {
            return Err(LedgerError::DuplicateClaim(record.coupon_code.clone()));
        }

        let stored = StoredClaim::from_record(record);
        txn.put_cf(cf_claims, code, encode(&stored)?)
            .map_err(storage_err)?;
        txn.put_cf(
            cf_session,
            index_key(record.session.as_str(), stored.claimed_at, &record.coupon_code),
            code,
        )
        .map_err(storage_err)?;
        txn.put_cf(
            cf_address,
            index_key(record.address.as_str(), stored.claimed_at, &record.coupon_code),
            code,
        )
        .map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn latest_by_session(&self, session: &SessionKey) -> Result<Option<ClaimRecord>, StoreError> {
        self.latest_in_index(CF_SESSION_INDEX, session.as_str())
    }

    fn latest_by_address(&self, address: &ClientAddress) -> Result<Option<ClaimRecord>, StoreError> {
        self.latest_in_index(CF_ADDRESS_INDEX, address.as_str())
    }

    fn by_coupon(&self, code: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let cf = self.cf_handle(CF_CLAIMS)?;
        self.db
            .get_cf(cf, code.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode::<StoredClaim>(&bytes).and_then(StoredClaim::into_record))
            .transpose()
    }

    fn list(&self) -> Result<Vec<ClaimRecord>, StoreError> {
        let cf = self.cf_handle(CF_CLAIMS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, bytes) = item.map_err(storage_err)?;
            records.push(decode::<StoredClaim>(&bytes)?.into_record()?);
        }
        records.sort_by_key(|r| r.claimed_at);
        Ok(records)
    }
}

// --- Encoding helpers ---

fn storage_err(e: rocksdb::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Lock contention on a coupon row means another writer got there first.
fn contended(e: rocksdb::Error, code: &str) -> PoolError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            PoolError::Conflict(code.to_string())
        }
        _ => PoolError::Store(storage_err(e)),
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_le_bytes)
        .map_err(|_| StoreError::Codec("invalid metadata value length".into()))
}

fn parse_address(raw: &str) -> Result<ClientAddress, StoreError> {
    ClientAddress::parse(raw).ok_or_else(|| StoreError::Codec("empty address".into()))
}

/// `len(key) (u32 BE) ‖ key`. The length prefix stops `ab` from matching
/// `abc`'s entries.
fn index_prefix(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + key.len() + INSTANT_KEY_LEN);
    prefix.extend_from_slice(&(key.len() as u32).to_be_bytes());
    prefix.extend_from_slice(key.as_bytes());
    prefix
}

fn index_key(key: &str, at: StoredInstant, code: &str) -> Vec<u8> {
    let mut full = index_prefix(key);
    full.extend_from_slice(&at.sort_key());
    full.extend_from_slice(code.as_bytes());
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Create a temporary RocksStore.
    fn temp_store() -> (RocksStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("coupons")).unwrap();
        (store, dir)
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    fn addr(s: &str) -> ClientAddress {
        ClientAddress::parse(s).unwrap()
    }

    fn record(code: &str, session: &str, address: &str, at: Timestamp) -> ClaimRecord {
        ClaimRecord {
            coupon_code: code.to_string(),
            address: addr(address),
            session: SessionKey::parse(session).unwrap(),
            claimed_at: at,
        }
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    #[test]
    fn instant_sort_key_is_chronological() {
        let before_epoch = StoredInstant::from_timestamp(Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap());
        let a = StoredInstant::from_timestamp(t0());
        let b = StoredInstant::from_timestamp(t0() + Duration::nanoseconds(1));
        let c = StoredInstant::from_timestamp(t0() + Duration::seconds(1));
        assert!(before_epoch.sort_key() < a.sort_key());
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
    }

    #[test]
    fn instant_keeps_nanoseconds() {
        let at = t0() + Duration::nanoseconds(123_456_789);
        assert_eq!(StoredInstant::from_timestamp(at).to_timestamp().unwrap(), at);
    }

    #[test]
    fn index_prefix_is_length_delimited() {
        let ab = index_prefix("ab");
        let abc_key = index_key("abc", StoredInstant::from_timestamp(t0()), "X");
        assert!(!abc_key.starts_with(&ab));
    }

    // ------------------------------------------------------------------
    // Pool
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_empty_store() {
        let (store, _dir) = temp_store();
        assert!(store.find_available().unwrap().is_none());
        assert!(CouponPool::list(&store).unwrap().is_empty());
        assert!(ClaimLedger::list(&store).unwrap().is_empty());
    }

    #[test]
    fn insert_and_get() {
        let (store, _dir) = temp_store();
        let coupon = store.insert(" SAVE10 ", t0()).unwrap();
        assert_eq!(coupon.code, "SAVE10");
        assert!(coupon.is_available());
        assert_eq!(store.get("SAVE10").unwrap().unwrap(), coupon);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn insert_duplicate_rejected() {
        let (store, _dir) = temp_store();
        store.insert("A", t0()).unwrap();
        assert_eq!(store.insert("A", t0()).unwrap_err(), PoolError::DuplicateCode("A".into()));
        assert_eq!(CouponPool::list(&store).unwrap().len(), 1);
    }

    #[test]
    fn insert_invalid_code_rejected() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.insert("  ", t0()), Err(PoolError::InvalidCode(_))));
    }

    #[test]
    fn list_in_creation_order() {
        let (store, _dir) = temp_store();
        for code in ["C", "A", "B"] {
            store.insert(code, t0()).unwrap();
        }
        let codes: Vec<_> = CouponPool::list(&store).unwrap().into_iter().map(|c| c.code).collect();
        assert_eq!(codes, ["C", "A", "B"]);
    }

    #[test]
    fn find_available_oldest_first() {
        let (store, _dir) = temp_store();
        store.insert("Z", t0()).unwrap();
        store.insert("A", t0()).unwrap();
        assert_eq!(store.find_available().unwrap().unwrap().code, "Z");
    }

    #[test]
    fn mark_claimed_then_conflict() {
        let (store, _dir) = temp_store();
        store.insert("A", t0()).unwrap();

        let claimed = store.mark_claimed("A", &addr("10.0.0.1"), t0()).unwrap();
        assert_eq!(claimed.claim.as_ref().unwrap().by, addr("10.0.0.1"));
        assert_eq!(claimed.claim.as_ref().unwrap().at, t0());
        assert!(store.find_available().unwrap().is_none());

        let err = store
            .mark_claimed("A", &addr("10.0.0.2"), t0() + Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err, PoolError::Conflict("A".into()));
        assert_eq!(store.get("A").unwrap().unwrap(), claimed);
    }

    #[test]
    fn mark_claimed_unknown() {
        let (store, _dir) = temp_store();
        assert_eq!(
            store.mark_claimed("X", &addr("10.0.0.1"), t0()).unwrap_err(),
            PoolError::NotFound("X".into())
        );
    }

    #[test]
    fn toggle_removes_and_restores_availability() {
        let (store, _dir) = temp_store();
        store.insert("A", t0()).unwrap();
        store.insert("B", t0()).unwrap();

        assert!(!store.toggle_active("A").unwrap().active);
        assert_eq!(store.find_available().unwrap().unwrap().code, "B");
        assert!(matches!(
            store.mark_claimed("A", &addr("1.1.1.1"), t0()),
            Err(PoolError::Conflict(_))
        ));

        assert!(store.toggle_active("A").unwrap().active);
        assert_eq!(store.find_available().unwrap().unwrap().code, "A");
    }

    #[test]
    fn toggle_claimed_coupon_stays_unavailable() {
        let (store, _dir) = temp_store();
        store.insert("A", t0()).unwrap();
        store.mark_claimed("A", &addr("1.1.1.1"), t0()).unwrap();
        store.toggle_active("A").unwrap();
        let coupon = store.toggle_active("A").unwrap();
        assert!(coupon.active);
        assert!(coupon.is_claimed());
        assert!(store.find_available().unwrap().is_none());
    }

    #[test]
    fn toggle_unknown() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.toggle_active("nope"), Err(PoolError::NotFound(_))));
    }

    #[test]
    fn concurrent_mark_claimed_single_winner() {
        let (store, _dir) = temp_store();
        store.insert("ONLY", t0()).unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.mark_claimed("ONLY", &addr(&format!("10.0.0.{i}")), t0())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, PoolError::Conflict(_))));
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    #[test]
    fn append_and_lookup() {
        let (store, _dir) = temp_store();
        let rec = record("A", "s1", "10.0.0.1", t0());
        store.append(&rec).unwrap();
        assert_eq!(store.by_coupon("A").unwrap().unwrap(), rec);
        assert_eq!(store.latest_by_session(&rec.session).unwrap().unwrap(), rec);
        assert_eq!(store.latest_by_address(&rec.address).unwrap().unwrap(), rec);
    }

    #[test]
    fn append_duplicate_code_rejected() {
        let (store, _dir) = temp_store();
        store.append(&record("A", "s1", "10.0.0.1", t0())).unwrap();
        assert_eq!(
            store.append(&record("A", "s2", "10.0.0.2", t0())).unwrap_err(),
            LedgerError::DuplicateClaim("A".into())
        );
        assert!(store.latest_by_session(&SessionKey::parse("s2").unwrap()).unwrap().is_none());
    }

    #[test]
    fn latest_picks_newest_regardless_of_append_order() {
        let (store, _dir) = temp_store();
        store.append(&record("NEW", "s1", "10.0.0.1", t0() + Duration::seconds(90))).unwrap();
        store.append(&record("OLD", "s1", "10.0.0.1", t0())).unwrap();
        store.append(&record("MID", "s1", "10.0.0.1", t0() + Duration::seconds(30))).unwrap();

        let s1 = SessionKey::parse("s1").unwrap();
        assert_eq!(store.latest_by_session(&s1).unwrap().unwrap().coupon_code, "NEW");
        assert_eq!(store.latest_by_address(&addr("10.0.0.1")).unwrap().unwrap().coupon_code, "NEW");
    }

    #[test]
    fn latest_does_not_leak_between_keys() {
        let (store, _dir) = temp_store();
        store.append(&record("A", "ab", "10.0.0.1", t0())).unwrap();
        store.append(&record("B", "abc", "10.0.0.10", t0() + Duration::seconds(5))).unwrap();

        let ab = SessionKey::parse("ab").unwrap();
        assert_eq!(store.latest_by_session(&ab).unwrap().unwrap().coupon_code, "A");
        assert!(store.latest_by_session(&SessionKey::parse("a").unwrap()).unwrap().is_none());
        assert_eq!(store.latest_by_address(&addr("10.0.0.1")).unwrap().unwrap().coupon_code, "A");
        assert!(store.latest_by_address(&addr("10.0.0.100")).unwrap().is_none());
    }

    #[test]
    fn ledger_list_chronological() {
        let (store, _dir) = temp_store();
        store.append(&record("B", "s1", "10.0.0.1", t0() + Duration::seconds(1))).unwrap();
        store.append(&record("A", "s2", "10.0.0.2", t0())).unwrap();
        let codes: Vec<_> = ClaimLedger::list(&store).unwrap().into_iter().map(|r| r.coupon_code).collect();
        assert_eq!(codes, ["A", "B"]);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coupons");
        {
            let store = RocksStore::open(&path).unwrap();
            store.insert("A", t0()).unwrap();
            store.insert("B", t0()).unwrap();
            store.mark_claimed("A", &addr("10.0.0.1"), t0()).unwrap();
            store.append(&record("A", "s1", "10.0.0.1", t0())).unwrap();
        }

        let store = RocksStore::open(&path).unwrap();
        assert_eq!(store.find_available().unwrap().unwrap().code, "B");
        assert!(store.get("A").unwrap().unwrap().is_claimed());
        assert_eq!(
            store.latest_by_address(&addr("10.0.0.1")).unwrap().unwrap().coupon_code,
            "A"
        );
        // Sequence counter survives reopen.
        store.insert("C", t0()).unwrap();
        let codes: Vec<_> = CouponPool::list(&store).unwrap().into_iter().map(|c| c.code).collect();
        assert_eq!(codes, ["A", "B", "C"]);
    }
}
