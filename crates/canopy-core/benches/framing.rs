use criterion::{black_box, criterion_group, criterion_main, Criterion};

use canopy_core::{frame, CborCodec, Fragment, Message, NetworkId};

fn sample_tree(width: usize) -> Fragment {
    let mut root = Fragment::new("config").with_net_id(NetworkId::new(1));
    for i in 0..width {
        root = root.child(
            Fragment::new("item")
                .with_net_id(NetworkId::new(i as u64 + 2))
                .attr("id", i.to_string())
                .attr("label", "entry"),
        );
    }
    root
}

fn bench_framing(c: &mut Criterion) {
    let codec = CborCodec::new();
    let small = Message::ChangeAttribute {
        net_id: NetworkId::new(7),
        name: "value".into(),
        value: "42".into(),
    }
    .encode(&codec)
    .unwrap();
    let large = Message::BindResponse {
        correlation: 1,
        roots: vec![sample_tree(500)],
    }
    .encode(&codec)
    .unwrap();

    c.bench_function("frame_short_header", |b| {
        b.iter(|| frame(black_box(&small), usize::MAX).unwrap())
    });

    c.bench_function("decode_bind_response_500", |b| {
        b.iter(|| {
            let f = frame(black_box(&large), usize::MAX).unwrap().unwrap();
            Message::decode(&f, &large, &codec).unwrap()
        })
    });
}

criterion_group!(benches, bench_framing);
criterion_main!(benches);
