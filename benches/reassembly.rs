//! Criterion benchmarks for the httptap hot path:
//! - `protocol::decode_packet` (zero-copy frame decoding)
//! - `Correlator::process_packet` (reassembly + pairing)

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use httptap::correlator::Correlator;
use httptap::protocol::{decode_packet, Direction, PacketRecord, TcpFlags};
use std::net::{IpAddr, Ipv4Addr};

const PORT: u16 = 80;

/// Build an Ethernet + IPv4 + TCP frame with the given payload.
fn make_frame(src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let total_pkt_len = 14 + 20 + 20 + payload.len();
    let mut pkt = vec![0u8; total_pkt_len];

    // Ethernet header
    pkt[0..6].copy_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    pkt[6..12].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    pkt[12] = 0x08;
    pkt[13] = 0x00;

    // IPv4 header
    let ip_total: u16 = (20 + 20 + payload.len()) as u16;
    let ip = &mut pkt[14..34];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&ip_total.to_be_bytes());
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

    // TCP header
    let tcp = &mut pkt[34..54];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[8..12].copy_from_slice(&ack.to_be_bytes());
    tcp[12] = 0x50; // data offset = 5
    tcp[13] = 0x18; // PSH|ACK
    tcp[14..16].copy_from_slice(&65535u16.to_be_bytes());

    pkt[54..].copy_from_slice(payload);
    pkt
}

fn record(incoming: bool, ack: u32, seq: u32, payload: &[u8]) -> PacketRecord {
    let client = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    let server = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
    let (src_addr, dst_addr, src_port, dst_port) = if incoming {
        (client, server, 49152, PORT)
    } else {
        (server, client, PORT, 49152)
    };
    PacketRecord {
        direction: if incoming {
            Direction::Incoming
        } else {
            Direction::Outgoing
        },
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        seq,
        ack,
        flags: TcpFlags {
            ack: true,
            psh: true,
            ..Default::default()
        },
        payload: payload.to_vec(),
    }
}

/// The reference traffic mix: a GET, a content-length POST, and a chunked
/// POST, each with its response.
fn exchange_mix(n: u32) -> Vec<PacketRecord> {
    let mut packets = Vec::new();
    for i in 0..n {
        let ack = i.wrapping_mul(7919).wrapping_add(13);
        let seq = i.wrapping_mul(104_729).wrapping_add(17);
        let resp_seq = i.wrapping_mul(1_299_709).wrapping_add(23);
        match i % 3 {
            0 => {
                let req = record(true, ack, seq, b"GET / HTTP/1.1\r\n\r\n");
                let resp = record(false, req.seq_end(), resp_seq, b"HTTP/1.1 200 OK\r\n\r\n");
                packets.push(req);
                packets.push(resp);
            }
            1 => {
                let body = [b'x'; 256];
                let mut data = b"POST / HTTP/1.1\r\nContent-Length: 256\r\n\r\n".to_vec();
                data.extend_from_slice(&body);
                let req = record(true, ack, seq, &data);
                let resp = record(
                    false,
                    req.seq_end(),
                    resp_seq,
                    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
                );
                packets.push(req);
                packets.push(resp);
            }
            _ => {
                let head = record(
                    true,
                    ack,
                    seq,
                    b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
                );
                let c1 = record(true, ack, head.seq_end(), b"1\r\na\r\n");
                let c2 = record(true, ack, c1.seq_end(), b"1\r\nb\r\n");
                let end = record(true, ack, c2.seq_end(), b"0\r\n\r\n");
                let resp = record(
                    false,
                    end.seq_end(),
                    resp_seq,
                    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
                );
                packets.push(head);
                packets.push(c1);
                packets.push(c2);
                packets.push(end);
                packets.push(resp);
            }
        }
    }
    packets
}

fn bench_decode_packet(c: &mut Criterion) {
    let get_frame = make_frame(49152, PORT, 1000, 1, b"GET / HTTP/1.1\r\n\r\n");
    let data_frame = make_frame(49152, PORT, 1000, 1, &[0x61; 1400]);

    let mut group = c.benchmark_group("decode_packet");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_72B", |b| {
        b.iter(|| {
            let _ = decode_packet(black_box(&get_frame), PORT);
        })
    });

    group.bench_function("data_1454B", |b| {
        b.iter(|| {
            let _ = decode_packet(black_box(&data_frame), PORT);
        })
    });

    group.finish();
}

fn bench_correlator(c: &mut Criterion) {
    let packets = exchange_mix(300);

    let mut group = c.benchmark_group("correlator");
    group.throughput(Throughput::Elements(packets.len() as u64));

    group.bench_function("exchange_mix_300", |b| {
        b.iter(|| {
            let mut correlator = Correlator::new(60.0);
            let mut emitted = 0usize;
            for pkt in &packets {
                emitted += correlator.process_packet(black_box(0.0), pkt).len();
            }
            black_box(emitted)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode_packet, bench_correlator);
criterion_main!(benches);
