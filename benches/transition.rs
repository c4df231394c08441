//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
#[macro_use]
extern crate bencher;

use bencher::Bencher;
use zangfx_d3d12::image::{TextureBuilder, TextureUsageFlags};
use zangfx_d3d12::subresource::{Aspects, SubresourceRange};
use zangfx_d3d12::Serial;

fn texture(layers: u32, mips: u32) -> zangfx_d3d12::image::TextureRef {
    TextureBuilder::new()
        .num_layers(layers)
        .num_mip_levels(mips)
        .usage(TextureUsageFlags::SAMPLED | TextureUsageFlags::RENDER)
        .build()
        .unwrap()
}

/// The common case: the whole texture in a single state.
fn uniform_full_range(b: &mut Bencher) {
    let t = texture(6, 10);
    let range = t.full_range();
    let mut serial = 1;
    let mut barriers = Vec::new();
    b.iter(|| {
        serial += 1;
        barriers.clear();
        t.track_usage(&mut barriers, &range, TextureUsageFlags::RENDER, Serial(serial));
        t.track_usage(&mut barriers, &range, TextureUsageFlags::SAMPLED, Serial(serial));
        barriers.len()
    });
}

/// Rendering into each mip level in turn, sampling from the previous one.
fn mip_chain(b: &mut Bencher) {
    let t = texture(1, 12);
    let mut serial = 1;
    let mut barriers = Vec::new();
    b.iter(|| {
        serial += 1;
        barriers.clear();
        for mip in 1..12 {
            let src = SubresourceRange::single(Aspects::COLOR, 0, mip - 1);
            let dst = SubresourceRange::single(Aspects::COLOR, 0, mip);
            t.track_usage(&mut barriers, &src, TextureUsageFlags::SAMPLED, Serial(serial));
            t.track_usage(&mut barriers, &dst, TextureUsageFlags::RENDER, Serial(serial));
        }
        barriers.len()
    });
}

/// Alternating usage of every other array layer.
fn fragmented_layers(b: &mut Bencher) {
    let t = texture(64, 1);
    let mut serial = 1;
    let mut barriers = Vec::new();
    b.iter(|| {
        serial += 1;
        barriers.clear();
        for layer in (0..64).step_by(2) {
            let range = SubresourceRange::single(Aspects::COLOR, layer, 0);
            t.track_usage(&mut barriers, &range, TextureUsageFlags::RENDER, Serial(serial));
        }
        t.track_usage(
            &mut barriers,
            &t.full_range(),
            TextureUsageFlags::SAMPLED,
            Serial(serial),
        );
        barriers.len()
    });
}

benchmark_group!(benches, uniform_full_range, mip_chain, fragmented_layers);
benchmark_main!(benches);
