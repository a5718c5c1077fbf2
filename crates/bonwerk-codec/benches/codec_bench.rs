// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the bonwerk-codec crate: template rendering,
// stream encoding and the parse/render preview path on a typical receipt.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use bonwerk_codec::{Template, encode_ops, parse, render, render_template};
use bonwerk_core::config::{PreviewConfig, TextEncoding};
use bonwerk_core::ops::{Alignment, Op, TextStyle};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn receipt_template() -> Template {
    let title = TextStyle::default()
        .with_alignment(Alignment::Center)
        .with_scale(2, 2)
        .with_bold(true);
    Template::new()
        .op(Op::Init)
        .op(Op::Style(title))
        .text("{{shop}}\n")
        .op(Op::ResetStyle)
        .extend(Template::parse(
            "{{#items}}Item {{items.0.name}}  {{items.0.price}}\n{{/items}}Total: {{total}}\n",
        ))
        .op(Op::Feed(3))
        .op(Op::Cut { partial: true })
}

fn receipt_data() -> serde_json::Value {
    json!({
        "shop": "Bäckerei Jansen",
        "items": [{ "name": "Roggenbrot", "price": "3.40" }],
        "total": "3.40",
    })
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Template rendering plus full stream encoding.
fn bench_encode_receipt(c: &mut Criterion) {
    let template = receipt_template();
    let data = receipt_data();

    c.bench_function("render_template + encode_ops (receipt)", |b| {
        b.iter(|| {
            let ops = render_template(black_box(&template), black_box(&data));
            black_box(encode_ops(&ops, &TextEncoding::Utf8));
        });
    });
}

/// Decode-back path: parse the encoded stream and rasterize it.
fn bench_preview_receipt(c: &mut Criterion) {
    let ops = render_template(&receipt_template(), &receipt_data());
    let bytes = encode_ops(&ops, &TextEncoding::Utf8);
    let config = PreviewConfig::default();

    c.bench_function("parse + render (receipt, 384 dots)", |b| {
        b.iter(|| {
            let doc = parse(black_box(&bytes));
            black_box(render(&doc.ops, &config));
        });
    });
}

criterion_group!(benches, bench_encode_receipt, bench_preview_receipt);
criterion_main!(benches);
