//! Injectable seams named in the external-interfaces contract:
//! `Clock.Now()`, `UUID.New()`, `Random.Digits(n)`. Kept here so both
//! `fleet-store` and `fleet-session` can share one fake in tests.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait UuidGen: Send + Sync {
    fn new_uuid(&self) -> Uuid;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUuidGen;

impl UuidGen for SystemUuidGen {
    fn new_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

pub trait CodeGen: Send + Sync {
    /// A string of exactly `n` decimal digits.
    fn digits(&self, n: usize) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCodeGen;

impl CodeGen for SystemCodeGen {
    fn digits(&self, n: usize) -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..n)
            .map(|_| char::from_digit(rng.random_range(0..10), 10).unwrap())
            .collect()
    }
}

#[cfg(any(test, feature = "test-fakes"))]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    pub struct FixedClock(pub Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += delta;
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    pub struct SequentialUuidGen(pub Mutex<u128>);

    impl Default for SequentialUuidGen {
        fn default() -> Self {
            Self(Mutex::new(1))
        }
    }

    impl UuidGen for SequentialUuidGen {
        fn new_uuid(&self) -> Uuid {
            let mut guard = self.0.lock().unwrap();
            let v = *guard;
            *guard += 1;
            Uuid::from_u128(v)
        }
    }

    pub struct SequentialCodeGen(pub Mutex<u32>);

    impl Default for SequentialCodeGen {
        fn default() -> Self {
            Self(Mutex::new(0))
        }
    }

    impl CodeGen for SequentialCodeGen {
        fn digits(&self, n: usize) -> String {
            let mut guard = self.0.lock().unwrap();
            let v = *guard;
            *guard += 1;
            format!("{v:0width$}", width = n)
        }
    }
}
