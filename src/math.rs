use faer::Mat;
use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let mut result = 0f64;
    for (val1, val2) in a.iter().zip(b) {
        result += *val1 * *val2;
    }
    result
}

/// `y += a * x`
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

/// `out = y + a * x`
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = a * x + y;
    });
}

/// `out = x - y`
pub(crate) fn difference(x: &[f64], y: &[f64], out: &mut [f64]) {
    assert!(x.len() == y.len());
    assert!(out.len() == x.len());

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = x - y;
    });
}

/// Dense matrix times vector, `out = mat * x`.
///
/// `mat` is column major, so we accumulate one column at a time.
pub(crate) fn mat_vec(mat: &Mat<f64>, x: &[f64], out: &mut [f64]) {
    assert!(mat.ncols() == x.len());
    assert!(mat.nrows() == out.len());

    out.fill(0f64);
    for (j, &xj) in x.iter().enumerate() {
        axpy(mat.col_as_slice(j), out, xj);
    }
}

pub(crate) fn all_finite(x: &[f64]) -> bool {
    x.iter().all(|val| val.is_finite())
}
