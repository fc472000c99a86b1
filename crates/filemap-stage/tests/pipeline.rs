//! End-to-end behaviour of stages and pipelines:
//! - absent bodies pass through untouched
//! - materialized and live bodies are mapped and keep their mode
//! - sync and async mappers produce identical output
//! - failures stay scoped to one record
//! - order is preserved across chained stages and uneven mapper latency

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use filemap_core::{BodyMode, LiveBody, Metadata, Record};
use filemap_stage::{
    BoxError, CallError, ErrorMode, MapStage, Mapper, Pipeline, StageOptions, StageState,
};
use futures_util::StreamExt;

fn upper_sync() -> Mapper {
    Mapper::infallible(|input: Bytes, _: &Metadata| input.to_ascii_uppercase())
}

fn upper_async() -> Mapper {
    Mapper::asynchronous(|input, _, done| {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            done.ok(input.to_ascii_uppercase());
        });
    })
}

fn append(suffix: &'static str) -> Mapper {
    Mapper::infallible(move |input: Bytes, _: &Metadata| {
        let mut out = input.to_vec();
        out.extend_from_slice(suffix.as_bytes());
        out
    })
}

async fn body_of(record: Record) -> Bytes {
    match record.mode() {
        BodyMode::Live => record
            .into_body()
            .into_live()
            .unwrap()
            .materialize()
            .await
            .unwrap(),
        _ => record.body().as_bytes().cloned().unwrap_or_default(),
    }
}

// ── Absent bodies ───────────────────────────────────────────────────

#[tokio::test]
async fn absent_body_is_a_no_op() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mapper = Mapper::infallible(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        "never"
    });

    let report = Pipeline::new()
        .pipe(mapper)
        .run(vec![Record::empty("some/dir").with_base("some")])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert!(record.body().is_absent());
    assert_eq!(record.metadata().relative_path().to_str(), Some("dir"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── Materialized and live bodies ────────────────────────────────────

#[tokio::test]
async fn identity_mapper_round_trips_bytes() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let mut stage = MapStage::new(Mapper::infallible(|_, _| ()));

    let out = stage
        .process(Record::new("bin.dat", payload.clone()))
        .await
        .unwrap();
    assert_eq!(out.body().as_bytes().unwrap().as_ref(), &payload[..]);

    let live = LiveBody::from_bytes(Bytes::from(payload.clone()), 333);
    let out = stage.process(Record::new("bin.dat", live)).await.unwrap();
    assert_eq!(out.mode(), BodyMode::Live);
    assert_eq!(body_of(out).await.as_ref(), &payload[..]);
}

#[tokio::test]
async fn uppercase_materialized_and_live() {
    for mapper in [upper_sync(), upper_async()] {
        let mut stage = MapStage::new(mapper);

        let out = stage.process(Record::new("a.txt", "hello")).await.unwrap();
        assert_eq!(out.mode(), BodyMode::Materialized);
        assert_eq!(body_of(out).await, Bytes::from("HELLO"));

        let live = LiveBody::from_bytes(Bytes::from("hello"), 2);
        let out = stage.process(Record::new("a.txt", live)).await.unwrap();
        assert_eq!(out.mode(), BodyMode::Live);
        assert_eq!(body_of(out).await, Bytes::from("HELLO"));
    }
}

#[tokio::test]
async fn sync_and_async_mappers_agree() {
    let inputs = ["", "a", "Mixed Case 123", "ünïcödé stays"];
    let records = |live: bool| -> Vec<Record> {
        inputs
            .iter()
            .copied()
            .enumerate()
            .map(|(i, text)| {
                let bytes = Bytes::from_static(text.as_bytes());
                if live {
                    Record::new(i.to_string(), LiveBody::from_bytes(bytes, 3))
                } else {
                    Record::new(i.to_string(), bytes)
                }
            })
            .collect()
    };

    for live in [false, true] {
        let sync = Pipeline::new().pipe(upper_sync()).run(records(live)).await.unwrap();
        let asynchronous = Pipeline::new().pipe(upper_async()).run(records(live)).await.unwrap();

        let mut left = Vec::new();
        for record in sync.records {
            left.push((record.mode(), body_of(record).await));
        }
        let mut right = Vec::new();
        for record in asynchronous.records {
            right.push((record.mode(), body_of(record).await));
        }
        assert_eq!(left, right);
    }
}

// ── Error isolation ─────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("rejected {0}")]
struct Rejected(String);

#[tokio::test]
async fn each_failure_is_reported_once_and_the_stage_stays_usable() {
    let mut stage = MapStage::new(Mapper::sync(|input: Bytes, _: &Metadata| {
        if input.starts_with(b"bad") {
            Err(Rejected(String::from_utf8_lossy(&input).into_owned()))
        } else {
            Ok(())
        }
    }));

    let first = stage.process(Record::new("1", "bad-one")).await.unwrap_err();
    let second = stage.process(Record::new("2", "bad-two")).await.unwrap_err();
    assert_eq!(first.downcast_ref::<Rejected>().unwrap().0, "bad-one");
    assert_eq!(second.path().to_str(), Some("2"));
    assert_eq!(stage.stats().errors, 2);
    assert_eq!(stage.stats().forwarded, 0);
    assert_eq!(stage.state(), StageState::Ready);

    let ok = stage.process(Record::new("3", "good")).await.unwrap();
    assert_eq!(ok.body().as_bytes().unwrap().as_ref(), b"good");
}

#[tokio::test]
async fn async_callback_error_and_abandonment_fail_only_that_record() {
    let mapper = Mapper::asynchronous(|input, _, done| match &input[..] {
        b"fail" => {
            done.err("callback failure");
        }
        b"drop" => drop(done),
        _ => {
            done.ok(());
        }
    });

    let report = Pipeline::new()
        .pipe(mapper)
        .run(vec![
            Record::new("1", "fail"),
            Record::new("2", "keep"),
            Record::new("3", "drop"),
        ])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].path().to_str(), Some("2"));
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.errors[0].source_error().to_string(), "callback failure");
    assert!(matches!(
        report.errors[1].downcast_ref::<CallError>(),
        Some(CallError::Abandoned)
    ));
}

#[tokio::test]
async fn panicking_mapper_fails_the_record() {
    let mapper = Mapper::sync(|input: Bytes, _: &Metadata| -> Result<(), BoxError> {
        if input.is_empty() {
            panic!("empty input");
        }
        Ok(())
    });

    let report = Pipeline::new()
        .pipe(mapper)
        .run(vec![Record::new("1", ""), Record::new("2", "x")])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert!(matches!(
        report.errors[0].downcast_ref::<CallError>(),
        Some(CallError::Panicked(msg)) if msg == "empty input"
    ));
}

// ── Ordering and termination ────────────────────────────────────────

#[tokio::test]
async fn three_stages_preserve_order_and_end_once() {
    let input: Vec<Record> = (0..20)
        .map(|i| {
            if i % 5 == 0 {
                Record::empty(format!("dir-{i}"))
            } else if i % 2 == 0 {
                Record::new(format!("f-{i}"), LiveBody::from_bytes(Bytes::from("x"), 1))
            } else {
                Record::new(format!("f-{i}"), "x")
            }
        })
        .collect();
    let expected: Vec<String> = input.iter().map(|r| r.path().display().to_string()).collect();

    let mut run = Pipeline::with_capacity(2)
        .pipe(append("a"))
        .pipe(upper_async())
        .pipe(append("c"))
        .spawn(futures_util::stream::iter(input));

    let mut seen = Vec::new();
    while let Some(item) = run.next().await {
        let record = item.unwrap();
        let path = record.path().display().to_string();
        if path.starts_with("dir-") {
            assert!(record.body().is_absent());
        } else {
            assert_eq!(body_of(record).await, Bytes::from("XAc"));
        }
        seen.push(path);
    }
    assert_eq!(seen, expected);
    assert!(run.next().await.is_none());

    let stats = run.finish().await.unwrap();
    assert_eq!(stats.len(), 3);
    assert!(stats.iter().all(|s| s.forwarded == 20 && s.absent == 4));
}

#[tokio::test]
async fn live_body_stays_live_through_every_stage() {
    let report = Pipeline::new()
        .pipe(append("1"))
        .pipe(append("2"))
        .pipe(append("3"))
        .run(vec![Record::new(
            "stream.log",
            LiveBody::from_bytes(Bytes::from("log:"), 2),
        )])
        .await
        .unwrap();

    let stats: Vec<u64> = report.stats.iter().map(|s| s.live).collect();
    assert_eq!(stats, vec![1, 1, 1]);
    let record = report.records.into_iter().next().unwrap();
    assert!(record.body().is_live());
    assert_eq!(body_of(record).await, Bytes::from("log:123"));
}

#[tokio::test]
async fn order_holds_when_later_records_finish_first() {
    let mapper = Mapper::asynchronous(|input, metadata, done| {
        let index: u64 = metadata.path().to_str().unwrap().parse().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20 - index * 2)).await;
            done.ok(input);
        });
    });

    let report = Pipeline::with_capacity(4)
        .pipe(mapper)
        .pipe(upper_sync())
        .run((0..10u64).map(|i| Record::new(i.to_string(), format!("r{i}"))))
        .await
        .unwrap();

    let bodies: Vec<String> = report
        .records
        .iter()
        .map(|r| String::from_utf8(r.body().as_bytes().unwrap().to_vec()).unwrap())
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("R{i}")).collect();
    assert_eq!(bodies, expected);
}

#[tokio::test]
async fn halted_stage_drops_the_rest_of_the_input() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let strict = MapStage::with_options(
        Mapper::sync(move |input: Bytes, _: &Metadata| {
            counter.fetch_add(1, Ordering::SeqCst);
            if &input[..] == b"stop" {
                Err("stop requested")
            } else {
                Ok(())
            }
        }),
        StageOptions::named("strict").with_error_mode(ErrorMode::Halt),
    );

    let report = Pipeline::with_capacity(1)
        .stage(strict)
        .pipe(append("!"))
        .run(vec![
            Record::new("1", "go"),
            Record::new("2", "stop"),
            Record::new("3", "go"),
        ])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].stage(), "strict");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stats_serialize_as_json() {
    let report = Pipeline::new()
        .pipe(upper_sync())
        .run(vec![Record::new("a", "x"), Record::empty("b")])
        .await
        .unwrap();

    let json = serde_json::to_value(&report.stats[0]).unwrap();
    assert_eq!(json["stage"], "stage-0");
    assert_eq!(json["materialized"], 1);
    assert_eq!(json["absent"], 1);
    assert_eq!(json["forwarded"], 2);
    assert_eq!(json["errors"], 0);
}
