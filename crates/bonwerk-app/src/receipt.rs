// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sample receipt used by the headless run.

use bonwerk_codec::{Template, generate_barcode, raster_op, render_template};
use bonwerk_codec::raster::DEFAULT_THRESHOLD;
use bonwerk_core::error::Result;
use bonwerk_core::ops::{Alignment, BarcodeFormat, BarcodeSpec, Op, TextStyle};
use image::{GrayImage, Luma};
use serde_json::{Value, json};

pub fn sample_data() -> Value {
    json!({
        "shop": "Bakkerij De Korenschoof",
        "address": "Oudegracht 112, Utrecht",
        "items": [
            { "name": "Volkorenbrood", "qty": 1, "price": "3.40" },
            { "name": "Appelflap", "qty": 2, "price": "4.50" },
            { "name": "Koffie", "qty": 1, "price": "2.80" }
        ],
        "total": "10.70",
        "member": { "name": "J. de Vries" },
        "order": "690123456789"
    })
}

fn header() -> Template {
    let title = TextStyle::default()
        .with_alignment(Alignment::Center)
        .with_scale(2, 2)
        .with_bold(true);
    let centered = TextStyle::default().with_alignment(Alignment::Center);
    Template::new()
        .op(Op::Style(title))
        .extend(Template::parse("{{shop}}\n"))
        .op(Op::Style(centered))
        .extend(Template::parse("{{address}}\n"))
        .op(Op::ResetStyle)
        .op(Op::Feed(1))
}

fn footer() -> Template {
    let total = TextStyle::default().with_bold(true).with_underline(true);
    let thanks = TextStyle::default()
        .with_alignment(Alignment::Center)
        .with_inverse(true);
    Template::new()
        .op(Op::Style(total))
        .extend(Template::parse("TOTAL EUR {{total}}\n"))
        .op(Op::ResetStyle)
        .extend(Template::parse(
            "{{#member}}Member: {{member.name}}\n{{/member}}",
        ))
        .op(Op::Style(thanks))
        .text(" Dank u wel! \n")
        .op(Op::ResetStyle)
}

/// A small shop logo: a ring on white.
fn logo() -> GrayImage {
    GrayImage::from_fn(96, 48, |x, y| {
        let dx = x as f32 - 48.0;
        let dy = (y as f32 - 24.0) * 2.0;
        let r = (dx * dx + dy * dy).sqrt();
        if (30.0..42.0).contains(&r) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Build the receipt operations for `data` on paper `width_dots` wide.
pub fn build(data: &Value, width_dots: u32) -> Result<Vec<Op>> {
    let mut ops = vec![Op::Init, Op::Style(TextStyle::default().with_alignment(Alignment::Center))];
    ops.push(raster_op(&logo(), width_dots, DEFAULT_THRESHOLD));
    ops.push(Op::LineFeed);
    ops.extend(render_template(&header(), data));

    let line = Template::parse("{{qty}} x {{name}}  {{price}}\n");
    for item in data["items"].as_array().into_iter().flatten() {
        ops.extend(render_template(&line, item));
    }
    ops.extend(render_template(&footer(), data));

    let order = data["order"].as_str().unwrap_or_default();
    if !order.is_empty() {
        ops.push(Op::Style(TextStyle::default().with_alignment(Alignment::Center)));
        ops.extend(generate_barcode(&BarcodeSpec::new(BarcodeFormat::Ean13, order))?);
        ops.push(Op::ResetStyle);
    }
    ops.push(Op::Feed(3));
    ops.push(Op::Cut { partial: true });
    Ok(ops)
}
