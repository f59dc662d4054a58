//! # Method Metrics
//!
//! Every invocation is wrapped in `begin`/`end` on the `MethodMetrics` for
//! its (caller, component, method, remote) tuple. Instruments are lock-free
//! atomics; the registry is a sharded map, so unrelated methods never contend.
//!
//! ```text
//! Dispatcher::route ──▶ MethodMetrics::begin ──▶ CallHandle
//!                                                   │
//!        local call / stub call  ◀──────────────────┘
//!                   │
//!                   ▼
//! MethodMetrics::end(handle, failed, request_bytes, reply_bytes)
//!        count += 1, latency += µs, errors += failed,
//!        sizes recorded only when remote
//! ```

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::DashMap;

pub const METHOD_COUNT: &str = "fabrun_method_count";
pub const METHOD_ERROR_COUNT: &str = "fabrun_method_error_count";
pub const METHOD_LATENCY_MICROS: &str = "fabrun_method_latency_micros";
pub const METHOD_BYTES_REQUEST: &str = "fabrun_method_bytes_request";
pub const METHOD_BYTES_REPLY: &str = "fabrun_method_bytes_reply";

/// 1, 2, 5, 10, 20, 50, ... up to 5e9.
fn default_bounds() -> Vec<u64> {
    let mut bounds = Vec::with_capacity(30);
    let mut decade = 1u64;
    for _ in 0..10 {
        for m in [1, 2, 5] {
            bounds.push(m * decade);
        }
        decade *= 10;
    }
    bounds
}

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<u64>,
    /// One bucket per bound plus an overflow bucket.
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_bounds(default_bounds())
    }

    pub fn with_bounds(bounds: Vec<u64>) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value: u64) {
        let idx = self.bounds.partition_point(|&b| b < value);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            count: self.count(),
            sum: self.sum(),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub bounds: Vec<u64>,
    /// Non-cumulative; the last entry counts values above every bound.
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum: u64,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodLabels {
    pub caller: String,
    pub component: String,
    pub method: String,
    pub remote: bool,
}

impl MethodLabels {
    fn render(&self) -> String {
        format!(
            "caller=\"{}\",component=\"{}\",method=\"{}\",remote=\"{}\"",
            escape(&self.caller),
            escape(&self.component),
            escape(&self.method),
            self.remote
        )
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Start of one measured call.
#[derive(Debug)]
pub struct CallHandle {
    start: Instant,
}

#[derive(Debug)]
pub struct MethodMetrics {
    labels: MethodLabels,
    pub count: Counter,
    pub errors: Counter,
    pub latency_micros: Histogram,
    pub bytes_request: Histogram,
    pub bytes_reply: Histogram,
}

impl MethodMetrics {
    pub fn new(labels: MethodLabels) -> Self {
        Self {
            labels,
            count: Counter::default(),
            errors: Counter::default(),
            latency_micros: Histogram::new(),
            bytes_request: Histogram::new(),
            bytes_reply: Histogram::new(),
        }
    }

    pub fn labels(&self) -> &MethodLabels {
        &self.labels
    }

    pub fn begin(&self) -> CallHandle {
        CallHandle {
            start: Instant::now(),
        }
    }

    pub fn end(&self, handle: CallHandle, failed: bool, request_bytes: usize, reply_bytes: usize) {
        let micros = u64::try_from(handle.start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.count.inc();
        if failed {
            self.errors.inc();
        }
        self.latency_micros.record(micros);
        if self.labels.remote {
            self.bytes_request.record(request_bytes as u64);
            self.bytes_reply.record(reply_bytes as u64);
        }
    }

    pub fn snapshot(&self) -> MethodSnapshot {
        MethodSnapshot {
            labels: self.labels.clone(),
            count: self.count.get(),
            errors: self.errors.get(),
            latency_micros: self.latency_micros.snapshot(),
            bytes_request: self.bytes_request.snapshot(),
            bytes_reply: self.bytes_reply.snapshot(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSnapshot {
    pub labels: MethodLabels,
    pub count: u64,
    pub errors: u64,
    pub latency_micros: HistogramSnapshot,
    pub bytes_request: HistogramSnapshot,
    pub bytes_reply: HistogramSnapshot,
}

/// Per-runtime table of method instruments, created on first use.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    methods: DashMap<MethodLabels, Arc<MethodMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(&self, caller: &str, component: &str, method: &str, remote: bool) -> Arc<MethodMetrics> {
        let labels = MethodLabels {
            caller: caller.to_string(),
            component: component.to_string(),
            method: method.to_string(),
            remote,
        };
        if let Some(existing) = self.methods.get(&labels) {
            return existing.value().clone();
        }
        self.methods
            .entry(labels.clone())
            .or_insert_with(|| Arc::new(MethodMetrics::new(labels)))
            .value()
            .clone()
    }

    /// Snapshot of every instrument, sorted by labels.
    pub fn snapshot(&self) -> Vec<MethodSnapshot> {
        let mut out: Vec<MethodSnapshot> = self.methods.iter().map(|e| e.value().snapshot()).collect();
        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        out
    }

    /// Renders every instrument in the Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "# TYPE {} counter", METHOD_COUNT);
        for m in &snapshot {
            let _ = writeln!(out, "{}{{{}}} {}", METHOD_COUNT, m.labels.render(), m.count);
        }
        let _ = writeln!(out, "# TYPE {} counter", METHOD_ERROR_COUNT);
        for m in &snapshot {
            let _ = writeln!(out, "{}{{{}}} {}", METHOD_ERROR_COUNT, m.labels.render(), m.errors);
        }

        write_histograms(&mut out, METHOD_LATENCY_MICROS, snapshot.iter().map(|m| (&m.labels, &m.latency_micros)));
        let remote = || snapshot.iter().filter(|m| m.labels.remote);
        write_histograms(&mut out, METHOD_BYTES_REQUEST, remote().map(|m| (&m.labels, &m.bytes_request)));
        write_histograms(&mut out, METHOD_BYTES_REPLY, remote().map(|m| (&m.labels, &m.bytes_reply)));
        out
    }
}

fn write_histograms<'a>(
    out: &mut String,
    name: &str,
    series: impl Iterator<Item = (&'a MethodLabels, &'a HistogramSnapshot)>,
) {
    let _ = writeln!(out, "# TYPE {} histogram", name);
    for (labels, h) in series {
        let labels = labels.render();
        let mut cumulative = 0;
        for (bound, n) in h.bounds.iter().zip(&h.buckets) {
            cumulative += n;
            let _ = writeln!(out, "{}_bucket{{{},le=\"{}\"}} {}", name, labels, bound, cumulative);
        }
        let _ = writeln!(out, "{}_bucket{{{},le=\"+Inf\"}} {}", name, labels, h.count);
        let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, h.sum);
        let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, h.count);
    }
}
