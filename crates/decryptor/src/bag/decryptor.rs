//! [`BagDecryptor`]: concurrent fan-out of the value decrypt over a bag.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::protocol::ID_KEY;
use common::{Bag, BagError, DecryptError, DecryptedBag};
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{SchemeV2, ValueDecryptor};
use crate::config::DecryptorConfig;
use crate::crypto::{EncryptedValue, Secret};

/// Decrypts every non-`"id"` field of a bag concurrently.
///
/// Each field is one task. The CPU-bound decrypt runs on Tokio's blocking
/// pool; when `max_concurrency` is configured, each [`decrypt_bag`] call gets
/// its own semaphore bounding how many of that bag's fields are in flight.
/// Concurrent calls and clones do not share the bound.
///
/// [`decrypt_bag`]: BagDecryptor::decrypt_bag
pub struct BagDecryptor<D = SchemeV2> {
    decryptor: Arc<D>,
    max_concurrency: Option<usize>,
}

impl<D> Clone for BagDecryptor<D> {
    fn clone(&self) -> Self {
        Self {
            decryptor: Arc::clone(&self.decryptor),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl BagDecryptor<SchemeV2> {
    /// Create a version-2 [`BagDecryptor`] from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `cfg` fails [`DecryptorConfig::validate`].
    pub fn new(cfg: &DecryptorConfig) -> anyhow::Result<Self> {
        Self::with_decryptor(SchemeV2, cfg)
    }
}

impl Default for BagDecryptor<SchemeV2> {
    /// Unbounded version-2 decryptor.
    fn default() -> Self {
        Self {
            decryptor: Arc::new(SchemeV2),
            max_concurrency: None,
        }
    }
}

impl<D: ValueDecryptor + 'static> BagDecryptor<D> {
    /// Create a [`BagDecryptor`] around a custom value decryptor.
    ///
    /// # Errors
    ///
    /// Returns an error if `cfg` fails [`DecryptorConfig::validate`].
    pub fn with_decryptor(decryptor: D, cfg: &DecryptorConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        Ok(Self {
            decryptor: Arc::new(decryptor),
            max_concurrency: cfg.max_concurrency,
        })
    }

    /// Decrypt all fields of `bag` with `secret`.
    ///
    /// Returns once every field unit has finished.
    ///
    /// # Errors
    ///
    /// Returns [`BagError::InputShape`] if `"id"` is missing or not a string.
    /// Returns [`BagError::Fields`] if any field failed; it carries every
    /// field that did decrypt.
    pub async fn decrypt_bag(&self, bag: &Bag, secret: &[u8]) -> Result<DecryptedBag, BagError> {
        let id = match bag.get(ID_KEY) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => {
                return Err(BagError::InputShape(format!(
                    "\"{ID_KEY}\" must be a string, got {}",
                    json_kind(other)
                )))
            }
            None => return Err(BagError::InputShape(format!("bag has no \"{ID_KEY}\" field"))),
        };

        let secret = Arc::new(Secret::new(secret));
        let limit = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let merged = Arc::new(Mutex::new(Merged::default()));
        let mut units = JoinSet::new();
        let mut fields = Vec::with_capacity(bag.len());

        for (field, raw) in bag.iter().filter(|(key, _)| key.as_str() != ID_KEY) {
            fields.push(field.clone());
            let unit = Unit {
                field: field.clone(),
                value: EncryptedValue::from_value(raw),
                decryptor: Arc::clone(&self.decryptor),
                secret: Arc::clone(&secret),
                limit: limit.clone(),
                merged: Arc::clone(&merged),
            };
            units.spawn(unit.run());
        }
        debug!(bag_id = %id, fields = fields.len(), "decrypt units launched");

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!(bag_id = %id, error = %e, "decrypt unit did not complete");
            }
        }

        let Merged {
            mut decrypted,
            mut failures,
        } = std::mem::take(&mut *merged.lock().await);

        for field in fields {
            if !decrypted.contains_key(&field) && !failures.contains_key(&field) {
                failures.insert(
                    field,
                    DecryptError::Aborted("unit finished without a result".into()),
                );
            }
        }

        info!(
            bag_id = %id,
            decrypted = decrypted.len(),
            failed = failures.len(),
            "bag decrypted"
        );

        decrypted.insert(ID_KEY.to_owned(), id);
        if failures.is_empty() {
            Ok(decrypted)
        } else {
            Err(BagError::Fields {
                decrypted,
                failures,
            })
        }
    }
}

/// Results gathered from every unit of one bag.
#[derive(Default)]
struct Merged {
    decrypted: DecryptedBag,
    failures: BTreeMap<String, DecryptError>,
}

/// Everything one field's task owns.
struct Unit<D> {
    field: String,
    value: Option<EncryptedValue>,
    decryptor: Arc<D>,
    secret: Arc<Secret>,
    limit: Option<Arc<Semaphore>>,
    merged: Arc<Mutex<Merged>>,
}

impl<D: ValueDecryptor + 'static> Unit<D> {
    async fn run(self) {
        let Unit {
            field,
            value,
            decryptor,
            secret,
            limit,
            merged,
        } = self;

        // Held until the result is merged.
        let _permit = match limit {
            Some(sem) => sem.acquire_owned().await.ok(),
            None => None,
        };

        let outcome = match value {
            None => Err(DecryptError::InputShape(
                "field is not an encrypted value record".into(),
            )),
            Some(value) => tokio::task::spawn_blocking(move || {
                decryptor.decrypt(&value, secret.expose())
            })
            .await
            .unwrap_or_else(|e| Err(DecryptError::Aborted(e.to_string()))),
        };

        match outcome {
            Ok(plaintext) => {
                debug!(field = %field, "field decrypted");
                merged.lock().await.decrypted.insert(field, plaintext);
            }
            Err(e) => {
                warn!(field = %field, code = e.code(), error = %e, "field decryption failed");
                merged.lock().await.failures.insert(field, e);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::MockValueDecryptor;
    use crate::crypto::encrypt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    const SECRET: &[u8] = b"abcdef1234";

    fn bag(value: Value) -> Bag {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn v2() -> BagDecryptor {
        BagDecryptor::default()
    }

    fn encrypted(plaintext: &str) -> Value {
        serde_json::to_value(encrypt(plaintext, SECRET).unwrap()).unwrap()
    }

    /// Mock that echoes each value's `cipher` tag, failing on `"fail"`.
    fn echo_mock(times: usize) -> MockValueDecryptor {
        let mut mock = MockValueDecryptor::new();
        mock.expect_decrypt()
            .times(times)
            .returning(|value, secret| {
                assert_eq!(secret, SECRET);
                match value.cipher() {
                    "fail" => Err(DecryptError::Integrity),
                    tag => Ok(tag.to_uppercase()),
                }
            });
        mock
    }

    #[tokio::test]
    async fn decrypts_every_field() {
        let input = bag(json!({
            "id": "creds",
            "user": encrypted("admin"),
            "password": encrypted("hunter2"),
        }));
        let out = v2()
            .decrypt_bag(&input, SECRET)
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out["id"], "creds");
        assert_eq!(out["user"], "admin");
        assert_eq!(out["password"], "hunter2");
    }

    #[tokio::test]
    async fn id_only_bag() {
        let out = v2()
            .decrypt_bag(&bag(json!({"id": "empty"})), SECRET)
            .await
            .unwrap();
        assert_eq!(out, DecryptedBag::from([("id".to_owned(), "empty".to_owned())]));
    }

    #[tokio::test]
    async fn non_string_id_is_input_shape_error() {
        let err = v2()
            .decrypt_bag(&bag(json!({"id": 7, "x": encrypted("y")})), SECRET)
            .await
            .unwrap_err();
        assert!(matches!(err, BagError::InputShape(ref m) if m.contains("number")));
    }

    #[tokio::test]
    async fn missing_id_is_input_shape_error() {
        let err = v2()
            .decrypt_bag(&bag(json!({"x": encrypted("y")})), SECRET)
            .await
            .unwrap_err();
        assert!(matches!(err, BagError::InputShape(_)));
    }

    #[tokio::test]
    async fn corrupted_field_is_named_and_others_survive() {
        let mut corrupted = encrypted("moon");
        corrupted["hmac"] = json!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\n");
        let input = bag(json!({
            "id": "mixed",
            "hello": encrypted("world"),
            "goodnight": corrupted,
            "yellow": encrypted("submarine"),
        }));

        let err = v2()
            .decrypt_bag(&input, SECRET)
            .await
            .unwrap_err();
        assert_eq!(err.failed_fields(), vec!["goodnight"]);

        let (decrypted, failures) = err.into_parts().unwrap();
        assert!(matches!(failures["goodnight"], DecryptError::Integrity));
        assert_eq!(decrypted.len(), 3);
        assert_eq!(decrypted["id"], "mixed");
        assert_eq!(decrypted["hello"], "world");
        assert_eq!(decrypted["yellow"], "submarine");
    }

    #[tokio::test]
    async fn wrong_secret_fails_every_field() {
        let input = bag(json!({
            "id": "creds",
            "a": encrypted("1"),
            "b": encrypted("2"),
        }));
        let err = v2()
            .decrypt_bag(&input, b"not the secret")
            .await
            .unwrap_err();
        assert_eq!(err.failed_fields(), vec!["a", "b"]);
        assert_eq!(err.decrypted().unwrap().len(), 1);
        assert!(err.report().iter().all(|f| f.code == "integrity"));
    }

    #[tokio::test]
    async fn non_record_field_is_reported_not_decrypted() {
        let mut mock = MockValueDecryptor::new();
        mock.expect_decrypt().times(1).returning(|_, _| Ok("ok".into()));
        let input = bag(json!({
            "id": "b",
            "good": {"cipher": "x"},
            "plain": 42,
        }));
        let err = BagDecryptor::with_decryptor(mock, &DecryptorConfig::default())
            .unwrap()
            .decrypt_bag(&input, SECRET)
            .await
            .unwrap_err();
        assert_eq!(err.failed_fields(), vec!["plain"]);
        assert_eq!(err.report()[0].code, "input_shape");
        assert_eq!(err.decrypted().unwrap()["good"], "ok");
    }

    #[tokio::test]
    async fn aggregates_failures_from_backend() {
        let input = bag(json!({
            "id": "b",
            "one": {"cipher": "first"},
            "two": {"cipher": "fail"},
            "three": {"cipher": "fail"},
        }));
        let err = BagDecryptor::with_decryptor(echo_mock(3), &DecryptorConfig::default())
            .unwrap()
            .decrypt_bag(&input, SECRET)
            .await
            .unwrap_err();
        assert_eq!(err.failed_fields(), vec!["three", "two"]);
        assert_eq!(err.decrypted().unwrap()["one"], "FIRST");
        assert!(err.to_string().contains("2 field(s)"));
    }

    /// Panics on values tagged `"panic"`.
    struct Panicky;

    impl ValueDecryptor for Panicky {
        fn decrypt(&self, value: &EncryptedValue, _: &[u8]) -> Result<String, DecryptError> {
            if value.cipher() == "panic" {
                panic!("backend blew up");
            }
            Ok("fine".into())
        }
    }

    /// Tracks how many decrypts overlap.
    #[derive(Default)]
    struct Slow {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ValueDecryptor for Arc<Slow> {
        fn decrypt(&self, _: &EncryptedValue, _: &[u8]) -> Result<String, DecryptError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("v".into())
        }
    }

    /// Every decrypt waits until all of them have started.
    struct Rendezvous(Barrier);

    impl ValueDecryptor for Rendezvous {
        fn decrypt(&self, _: &EncryptedValue, _: &[u8]) -> Result<String, DecryptError> {
            self.0.wait();
            Ok("met".into())
        }
    }

    fn wide_bag(fields: usize) -> Bag {
        let mut input = bag(json!({"id": "wide"}));
        for i in 0..fields {
            input.insert(format!("f{i}"), json!({"cipher": "x"}));
        }
        input
    }

    #[tokio::test]
    async fn panicking_unit_is_recorded_as_aborted() {
        let input = bag(json!({
            "id": "b",
            "calm": {"cipher": "x"},
            "boom": {"cipher": "panic"},
        }));
        let err = BagDecryptor::with_decryptor(Panicky, &DecryptorConfig::default())
            .unwrap()
            .decrypt_bag(&input, SECRET)
            .await
            .unwrap_err();
        let (decrypted, failures) = err.into_parts().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures["boom"], DecryptError::Aborted(_)));
        assert_eq!(decrypted["calm"], "fine");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn max_concurrency_bounds_in_flight_units() {
        let slow = Arc::new(Slow::default());
        let cfg = DecryptorConfig {
            max_concurrency: Some(2),
            ..DecryptorConfig::default()
        };
        let out = BagDecryptor::with_decryptor(Arc::clone(&slow), &cfg)
            .unwrap()
            .decrypt_bag(&wide_bag(8), SECRET)
            .await
            .unwrap();
        assert_eq!(out.len(), 9);
        let peak = slow.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak was {peak}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unbounded_units_run_in_parallel() {
        // Completes only if all six decrypts are in flight at the same time.
        let decryptor =
            BagDecryptor::with_decryptor(Rendezvous(Barrier::new(6)), &DecryptorConfig::default())
                .unwrap();
        let out = tokio::time::timeout(
            Duration::from_secs(10),
            decryptor.decrypt_bag(&wide_bag(6), SECRET),
        )
        .await
        .expect("units did not run concurrently")
        .unwrap();
        assert!(out.iter().filter(|(k, _)| k.as_str() != "id").all(|(_, v)| v == "met"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_runs_yield_identical_maps() {
        let mut input = bag(json!({"id": "stable"}));
        for i in 0..16 {
            input.insert(format!("field{i}"), json!({"cipher": format!("value{i}")}));
        }
        let decryptor =
            BagDecryptor::with_decryptor(echo_mock(16 * 5), &DecryptorConfig::default()).unwrap();

        let first = decryptor.decrypt_bag(&input, SECRET).await.unwrap();
        for _ in 0..4 {
            assert_eq!(decryptor.decrypt_bag(&input, SECRET).await.unwrap(), first);
        }
        assert_eq!(first["field7"], "VALUE7");
    }

    #[test]
    fn zero_concurrency_is_rejected_at_construction() {
        let cfg = DecryptorConfig {
            max_concurrency: Some(0),
            ..DecryptorConfig::default()
        };
        assert!(BagDecryptor::new(&cfg).is_err());
        assert!(BagDecryptor::with_decryptor(Panicky, &cfg).is_err());
    }

    #[test]
    fn oversized_concurrency_is_rejected_at_construction() {
        let cfg = DecryptorConfig {
            max_concurrency: Some(usize::MAX),
            ..DecryptorConfig::default()
        };
        assert!(BagDecryptor::new(&cfg).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_bound_is_per_call() {
        // Two single-field bags on one bound-1 decryptor: both decrypts must
        // be in flight together, so each call needs its own permit.
        let cfg = DecryptorConfig {
            max_concurrency: Some(1),
            ..DecryptorConfig::default()
        };
        let decryptor = BagDecryptor::with_decryptor(Rendezvous(Barrier::new(2)), &cfg).unwrap();
        let other = decryptor.clone();
        let first = wide_bag(1);
        let second = wide_bag(1);

        let (a, b) = tokio::time::timeout(
            Duration::from_secs(10),
            async {
                tokio::join!(
                    decryptor.decrypt_bag(&first, SECRET),
                    other.decrypt_bag(&second, SECRET)
                )
            },
        )
        .await
        .expect("calls shared one concurrency bound");
        assert_eq!(a.unwrap()["f0"], "met");
        assert_eq!(b.unwrap()["f0"], "met");
    }
}
