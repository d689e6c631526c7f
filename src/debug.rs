//! Compact vector formatters for trace logging of solver buffers.

use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

fn join<T>(v: &[T], fmt: impl Fn(&T) -> String) -> String {
    let parts: Vec<String> = v.iter().map(fmt).collect();
    format!("[{}]", parts.join(", "))
}

pub fn format_f64_vec(v: &[f64]) -> String {
    join(v, |f| dtoa(*f, FLOAT_CONFIG))
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    join(v, |z| {
        format!(
            "{}{}j{}",
            dtoa(z.re, FLOAT_CONFIG),
            if z.im.signum() < 0.0 { "-" } else { "+" },
            dtoa(z.im.abs(), FLOAT_CONFIG)
        )
    })
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    join(v, |z| {
        format!(
            "{}\u{2220}{}\u{00B0}",
            dtoa(z.norm(), FLOAT_CONFIG),
            dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
        )
    })
}
