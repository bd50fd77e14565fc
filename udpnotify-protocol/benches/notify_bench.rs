use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::SocketAddr;
use udpnotify_protocol::packet::{NotifyHeader, Packet};
use udpnotify_protocol::{CommandPacket, Config, Connection, Sequencer};

fn bench_notify_header_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify_header_write");

    for width in [1usize, 2, 4, 8] {
        let header = NotifyHeader {
            sequence: 1000 & Sequencer::new(width).max(),
            recv_sequence: 998 & Sequencer::new(width).max(),
            recv_mask: 0b1011,
        };
        let mut buf = BytesMut::with_capacity(64);

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                buf.clear();
                black_box(&header).write(&mut buf, width);
                black_box(&buf);
            });
        });
    }

    group.finish();
}

fn bench_notify_parse(c: &mut Criterion) {
    let header = NotifyHeader {
        sequence: 1000,
        recv_sequence: 998,
        recv_mask: 0b1011,
    };
    let mut buf = BytesMut::new();
    header.write(&mut buf, 2);
    buf.extend_from_slice(&[0u8; 1100]); // near-MTU payload
    let datagram = buf.freeze();

    let mut group = c.benchmark_group("notify_parse");
    group.throughput(Throughput::Bytes(datagram.len() as u64));
    group.bench_function("packet_parse", |b| {
        b.iter(|| {
            let packet = Packet::parse(black_box(&datagram), 2).unwrap();
            black_box(packet);
        });
    });
    group.finish();
}

fn bench_sequencer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer");

    group.bench_function("next", |b| {
        let mut seq = Sequencer::new(2);
        b.iter(|| black_box(seq.next()));
    });

    group.bench_function("distance_wrapping", |b| {
        let seq = Sequencer::new(2);
        b.iter(|| black_box(seq.distance(black_box(3), black_box(65530))));
    });

    group.finish();
}

fn bench_notify_roundtrip(c: &mut Criterion) {
    let config = Config::default();
    let addr: SocketAddr = "127.0.0.1:25005".parse().unwrap();
    let payload = [0u8; 100];

    c.bench_function("connection_notify_roundtrip", |b| {
        let mut sender: Connection<u32> = Connection::new(&config, addr, 0.0);
        let mut receiver: Connection<u32> = Connection::new(&config, addr, 0.0);
        sender
            .handle_command(CommandPacket::ConnectRequest, 0.0)
            .unwrap();
        receiver
            .handle_command(CommandPacket::ConnectRequest, 0.0)
            .unwrap();
        let mut now = 0.0;

        b.iter(|| {
            now += 0.001;
            let datagram = sender.prepare_notify(&payload, Some(1), now).unwrap();
            let (header, _) = NotifyHeader::parse(&datagram, 2).unwrap();
            black_box(receiver.receive_notify(&header, now));

            let ack = receiver.prepare_notify(&[], None, now).unwrap();
            let (header, _) = NotifyHeader::parse(&ack, 2).unwrap();
            black_box(sender.receive_notify(&header, now));
        });
    });
}

criterion_group!(
    benches,
    bench_notify_header_write,
    bench_notify_parse,
    bench_sequencer,
    bench_notify_roundtrip
);
criterion_main!(benches);
