// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk Codec: pure transforms between printer operations and ESC/POS
// bytes.  Nothing in this crate performs I/O or keeps global state: the style
// cursor lives in a `Codec` value owned by one print session.

pub mod barcode;
pub mod codec;
pub mod command;
pub mod preview;
pub mod raster;
pub mod template;

pub use barcode::{check_digit, generate_barcode, validate_barcode};
pub use codec::{Codec, TextEncoder, encode_ops};
pub use preview::{ParseWarning, ParsedDocument, encode_png, parse, preview_png, render};
pub use raster::{bitmap_from_gray, raster_op};
pub use template::{Template, TemplateIssue, TemplateNode, render_template, validate_template};
