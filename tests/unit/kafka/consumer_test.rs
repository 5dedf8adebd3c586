//! Consumer behavior against the in-process broker

use crate::unit::common::*;
use std::collections::BTreeSet;
use std::time::Instant;
use velostream_kafka::velostream::kafka::POLL_FOREVER;

fn produce(topic: &str, values: &[Value]) -> Result<(), TestHarnessError> {
    let producer = KafkaProducer::new()?;
    for value in values {
        producer.send(ProducerRecord::new(topic, value.clone())).get()?;
    }
    Ok(())
}

fn topic_set(topics: &[&str]) -> BTreeSet<String> {
    topics.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_subscribe_replaces_previous_subscription() {
    with_test_broker(|| {
        let consumer = KafkaConsumer::new("replace-group")?;
        assert_eq!(consumer.subscription()?, None);

        consumer.subscribe("alpha")?;
        assert_eq!(consumer.subscription()?, Some(topic_set(&["alpha"])));

        consumer.subscribe(["beta", "gamma", "beta"])?;
        assert_eq!(consumer.subscription()?, Some(topic_set(&["beta", "gamma"])));

        consumer.subscribe(Vec::<String>::new())?;
        assert_eq!(consumer.subscription()?, None);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_poll_returns_records_in_offset_order() {
    with_test_broker(|| {
        let topic = unique_topic("ordered");
        let values: Vec<Value> = (0..5).map(Value::Integer).collect();
        produce(&topic, &values)?;

        let consumer = KafkaConsumer::new("ordered-group")?;
        consumer.subscribe(&topic)?;
        let records = consumer.poll_once(Duration::from_secs(5))?.into_records()?;

        let offsets: Vec<i64> = records.iter().map(|r| r.offset()).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert!(records.iter().all(|r| r.topic() == topic && r.partition() == 0));
        let polled: Vec<Value> = records.into_iter().map(|r| r.into_value()).collect();
        assert_eq!(polled, values);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_poll_timeout_bounds() {
    with_test_broker(|| {
        let consumer = KafkaConsumer::new("timeout-group")?;
        consumer.subscribe(unique_topic("quiet"))?;

        let started = Instant::now();
        assert!(consumer.poll_once(Duration::ZERO)?.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));

        let started = Instant::now();
        assert!(consumer.poll_once(Duration::from_millis(150))?.is_empty());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150));
        assert!(waited < Duration::from_secs(5));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_forever_poll_returns_when_a_record_arrives() {
    with_test_broker(|| {
        let topic = unique_topic("late");
        let consumer = KafkaConsumer::new("forever-group")?;
        consumer.subscribe(&topic)?;

        // Scoped settings are thread local; hand the broker's to the sender
        let settings = config::current();
        let sender = std::thread::spawn(move || {
            config::with_settings(settings, || {
                std::thread::sleep(Duration::from_millis(50));
                produce(&topic, &[Value::from("late")])
            })
        });

        let records = consumer.poll_once(POLL_FOREVER)?.into_records()?;
        sender.join().unwrap()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value(), &Value::from("late"));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_stream_is_lazy_and_unbounded() {
    with_test_broker(|| {
        let topic = unique_topic("lazy");
        let consumer = KafkaConsumer::new("lazy-group")?;
        consumer.subscribe(&topic)?;

        // Created before anything exists on the topic; nothing polled yet
        let mut stream = consumer.consume().values();

        produce(&topic, &[Value::from("a"), Value::from("b")])?;
        assert_eq!(stream.next().transpose()?, Some(Value::from("a")));
        assert_eq!(stream.next().transpose()?, Some(Value::from("b")));

        produce(&topic, &[Value::from("c")])?;
        assert_eq!(stream.next().transpose()?, Some(Value::from("c")));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_closed_consumer_ends_stream() {
    with_test_broker(|| {
        let consumer = KafkaConsumer::new("closing-group")?;
        consumer.subscribe(unique_topic("closing"))?;
        let mut stream = consumer.consume();

        consumer.close()?;
        assert!(matches!(stream.next(), Some(Err(KafkaClientError::Closed))));
        assert!(stream.next().is_none());
        assert!(matches!(
            consumer.poll_once(Duration::ZERO),
            Err(KafkaClientError::Closed)
        ));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_stream_ends_when_broker_stops() {
    let mut stream = with_test_broker(|| {
        let consumer = KafkaConsumer::new("orphaned-group")?;
        consumer.subscribe(unique_topic("orphaned"))?;
        Ok::<_, TestHarnessError>(consumer.consume())
    })
    .unwrap();

    assert!(matches!(
        stream.next(),
        Some(Err(KafkaClientError::Connection { .. }))
    ));
    assert!(stream.next().is_none());
}

#[test]
fn test_decode_failure_keeps_coordinates_and_rest_of_batch() {
    with_test_broker(|| {
        let topic = unique_topic("mixed");
        let producer = KafkaProducer::new()?;
        producer
            .send_with(ProducerRecord::new(&topic, Value::from("not json {")), &RawCodec)
            .get()?;
        producer
            .send_with(ProducerRecord::new(&topic, Value::Integer(7)), &JsonCodec)
            .get()?;

        let consumer = KafkaConsumer::new("mixed-group")?;
        consumer.subscribe(&topic)?;
        let mut batch = consumer.poll_once_with(Duration::from_secs(5), Arc::new(JsonCodec))?;
        assert_eq!(batch.len(), 2);

        match batch.next() {
            Some(Err(KafkaClientError::Decode {
                topic: failed_topic,
                partition,
                offset,
                field,
                bytes,
                ..
            })) => {
                assert_eq!(failed_topic, topic);
                assert_eq!((partition, offset, field), (0, 0, "value"));
                assert_eq!(bytes.as_deref(), Some(&b"not json {"[..]));
            }
            other => panic!("expected decode error, got {:?}", other),
        }
        let second = batch.next().unwrap()?;
        assert_eq!(second.value(), &Value::Integer(7));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_scoped_deserializer_applies_to_poll() {
    with_test_broker(|| {
        let topic = unique_topic("scoped-de");
        let producer = KafkaProducer::new()?;
        producer
            .send_with(ProducerRecord::new(&topic, Value::from("plain")), &StringCodec)
            .get()?;

        let consumer = KafkaConsumer::new("scoped-de-group")?;
        consumer.subscribe(&topic)?;
        let records = config::scoped(
            |s| s.deserializer = Arc::new(StringCodec),
            || -> Result<Vec<ConsumerRecord>, KafkaClientError> {
                consumer.poll_once(Duration::from_secs(5))?.into_records()
            },
        )?;
        assert_eq!(records[0].value(), &Value::from("plain"));
        assert_eq!(records[0].key(), &Value::Null);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_group_resumes_after_reconnect() {
    with_test_broker(|| {
        let topic = unique_topic("resume");
        produce(&topic, &[Value::Integer(1), Value::Integer(2)])?;

        let first = KafkaConsumer::new("resume-group")?;
        first.subscribe(&topic)?;
        assert_eq!(first.poll_once(Duration::from_secs(5))?.len(), 2);
        first.close()?;

        produce(&topic, &[Value::Integer(3)])?;
        let second = KafkaConsumer::new("resume-group")?;
        second.subscribe(&topic)?;
        let records = second.poll_once(Duration::from_secs(5))?.into_records()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset(), 2);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_topics_to_records_reads_from_start_with_fresh_group() {
    with_test_broker(|| {
        let topic = unique_topic("fresh");
        produce(&topic, &[Value::from("x"), Value::from("y")])?;

        for _ in 0..2 {
            let stream = topics_to_records(&topic, StreamOptions::new())?;
            let group = stream.consumer().group_id().to_string();
            assert!(group.starts_with("velostream-"));

            let read: Vec<Value> = stream.values().take(2).collect::<Result<_, _>>()?;
            assert_eq!(read, vec![Value::from("x"), Value::from("y")]);
        }
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_max_poll_records_caps_batches() {
    with_test_broker(|| {
        let topic = unique_topic("capped");
        let values: Vec<Value> = (0..6).map(Value::Integer).collect();
        produce(&topic, &values)?;

        let options = StreamOptions::new()
            .group_id("capped-group")
            .property("max.poll.records", "4");
        let stream = topics_to_records(&topic, options)?;
        let consumer = stream.consumer().clone();
        assert_eq!(consumer.group_id(), "capped-group");
        assert_eq!(consumer.config()["max.poll.records"], "4");

        assert_eq!(consumer.poll_once(Duration::from_secs(5))?.len(), 4);
        assert_eq!(consumer.poll_once(Duration::from_secs(5))?.len(), 2);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}
