//! Produce/consume round trips through a full harness
//!
//! Exercises the consumer and producer together across partitions, topics
//! and codecs, the way an application would use them.

use super::super::*;
use std::collections::BTreeSet;
use velostream_kafka::velostream::test_harness::{MemoryBackend, with_broker, with_zookeeper};

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
struct Trade {
    symbol: String,
    quantity: i64,
    price: f64,
}

fn trade(symbol: &str, quantity: i64) -> Trade {
    Trade {
        symbol: symbol.to_string(),
        quantity,
        price: 101.25,
    }
}

fn with_partitions<T>(
    partitions: u32,
    body: impl FnOnce() -> Result<T, TestHarnessError>,
) -> Result<T, TestHarnessError> {
    let backend = MemoryBackend::new();
    let overlay = Properties::from([("num.partitions".to_string(), partitions.to_string())]);
    with_zookeeper(&backend, || with_broker(&backend, &overlay, body))
}

#[test]
fn test_keyed_trades_round_trip_with_json() {
    init_logging();
    with_partitions(3, || {
        let topic = unique_topic("trades");
        let trades: Vec<Trade> = ["AAA", "BBB", "CCC", "AAA", "BBB", "AAA"]
            .iter()
            .enumerate()
            .map(|(i, s)| trade(s, i as i64))
            .collect();

        config::scoped(
            |s| {
                s.serializer = Arc::new(JsonCodec);
                s.deserializer = Arc::new(JsonCodec);
            },
            || -> Result<(), TestHarnessError> {
                let records = trades
                    .iter()
                    .map(|t| -> Result<ProducerRecord, TestHarnessError> {
                        let value = Value::from_serialize(t).map_err(KafkaClientError::from)?;
                        Ok(ProducerRecord::new(&topic, value).with_key(Value::from(t.symbol.as_str())))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let sent = send_many(records, None, None)?.collect::<Result<Vec<_>, _>>()?;
                assert_eq!(sent.len(), trades.len());

                let received: Vec<ConsumerRecord> = topics_to_records(&topic, StreamOptions::new())?
                    .take(trades.len())
                    .collect::<Result<_, _>>()?;

                // Per-partition order is preserved and each symbol sticks to one partition
                for symbol in ["AAA", "BBB", "CCC"] {
                    let of_symbol: Vec<&ConsumerRecord> = received
                        .iter()
                        .filter(|r| r.key() == &Value::from(symbol))
                        .collect();
                    let partitions: BTreeSet<i32> = of_symbol.iter().map(|r| r.partition()).collect();
                    assert_eq!(partitions.len(), 1);
                    let quantities: Vec<i64> = of_symbol
                        .iter()
                        .map(|r| r.value().deserialize_into::<Trade>().map(|t| t.quantity))
                        .collect::<Result<_, _>>()
                        .map_err(KafkaClientError::from)?;
                    let mut sorted = quantities.clone();
                    sorted.sort();
                    assert_eq!(quantities, sorted);
                }

                let mut decoded: Vec<Trade> = received
                    .iter()
                    .map(|r| r.value().deserialize_into())
                    .collect::<Result<_, _>>()
                    .map_err(KafkaClientError::from)?;
                decoded.sort_by_key(|t| t.quantity);
                assert_eq!(decoded, trades);
                Ok(())
            },
        )
    })
    .unwrap();
}

#[test]
fn test_stream_spans_subscribed_topics() {
    with_test_broker(|| {
        let orders = unique_topic("orders");
        let refunds = unique_topic("refunds");
        send_all(
            vec![
                ProducerRecord::new(&orders, Value::from("o1")),
                ProducerRecord::new(&refunds, Value::from("r1")),
                ProducerRecord::new(&orders, Value::from("o2")),
            ],
            None,
            None,
        )?;

        let seen: BTreeSet<String> = topics_to_records([&orders, &refunds], StreamOptions::new())?
            .values()
            .take(3)
            .map(|v| v.map(|v| v.as_str().unwrap_or_default().to_string()))
            .collect::<Result<_, _>>()?;
        assert_eq!(
            seen,
            ["o1", "o2", "r1"].iter().map(|s| s.to_string()).collect()
        );
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_keyless_records_decode_null_key() {
    with_test_broker(|| {
        let topic = unique_topic("compacted");
        let producer = KafkaProducer::new()?;
        producer
            .send(ProducerRecord::new(&topic, Value::from("live")).with_key(Value::from("id-1")))
            .get()?;

        let consumer = KafkaConsumer::new("tombstone-group")?;
        consumer.subscribe(&topic)?;
        let record = consumer
            .poll_once(Duration::from_secs(5))?
            .next()
            .unwrap()?;
        assert_eq!(record.key(), &Value::from("id-1"));

        producer.send(ProducerRecord::new(&topic, Value::Integer(2))).get()?;
        let keyless = consumer
            .poll_once(Duration::from_secs(5))?
            .next()
            .unwrap()?;
        assert_eq!(keyless.key(), &Value::Null);
        assert_eq!(keyless.value(), &Value::Integer(2));
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}
