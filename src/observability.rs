use biometrics::{Collector, Counter};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_REQUEST_RETRIES: Counter = Counter::new("parley.client.retries");

pub(crate) static CACHE_HITS: Counter = Counter::new("parley.cache.hits");
pub(crate) static CACHE_MISSES: Counter = Counter::new("parley.cache.misses");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("parley.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("parley.stream.errors");

pub(crate) static STORE_SAVES: Counter = Counter::new("parley.store.saves");
pub(crate) static STORE_MALFORMED: Counter = Counter::new("parley.store.malformed");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_RETRIES);

    collector.register_counter(&CACHE_HITS);
    collector.register_counter(&CACHE_MISSES);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);

    collector.register_counter(&STORE_SAVES);
    collector.register_counter(&STORE_MALFORMED);
}
