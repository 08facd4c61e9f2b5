// authCode: контрольная сумма параметров запроса
//
// authCode = base64(SHA1("k1=v1&k2=v2...:" + secret)), ключи по алфавиту, сам authCode не входит.
// secret это auth secret аккаунта; в отличие от authKey он в запросе не передаётся.

use crate::error::Result;
use crate::protocol::envelope::{Params, Value};
use crate::protocol::wire::pack_raw;
use crate::utils::b64;
use sha1::{Digest, Sha1};

pub const AUTH_CODE_KEY: &str = "authCode";

/// Строковое представление значения в каноничной строке
fn render(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Nil => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => render_float(*f),
        Value::Str(s) => s.clone(),
        Value::Bin(b) => b64::encode(b),
        // вложенные структуры передаются как есть, в строку идёт их msgpack
        nested @ (Value::Array(_) | Value::Map(_)) => b64::encode(&pack_raw(nested)?),
    })
}

/// Числа с плавающей точкой в том виде, в каком их печатает игровой клиент:
/// целые значения с `.0`, `nan`/`inf` в нижнем регистре
fn render_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Каноничная строка `k=v&k=v` по всем параметрам, кроме authCode
pub fn canonical_query(params: &Params) -> Result<String> {
    let mut parts = Vec::with_capacity(params.len());
    for (key, value) in params.iter().filter(|(k, _)| k.as_str() != AUTH_CODE_KEY) {
        parts.push(format!("{}={}", key, render(value)?));
    }
    Ok(parts.join("&"))
}

pub fn compute_auth_code(params: &Params, secret: &str) -> Result<String> {
    let mut input = canonical_query(params)?;
    input.push(':');
    input.push_str(secret);
    Ok(b64::encode(&Sha1::digest(input.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let mut params = Params::new();
        params.insert("userId".into(), Value::from(123456789i64));
        params.insert("authKey".into(), Value::from("ak"));
        params.insert("appVer".into(), Value::from("2.90.0"));
        assert_eq!(
            compute_auth_code(&params, "ak").unwrap(),
            "8C4nA9Ndah5YKPjQT+IdnMdUPy8="
        );

        // authCode в параметрах не влияет на результат
        params.insert(AUTH_CODE_KEY.into(), Value::from("stale"));
        assert_eq!(
            compute_auth_code(&params, "ak").unwrap(),
            "8C4nA9Ndah5YKPjQT+IdnMdUPy8="
        );
    }

    #[test]
    fn test_float_rendering_keeps_decimal_point() {
        let mut params = Params::new();
        params.insert("a".into(), Value::Float(1.0));
        params.insert("b".into(), Value::Float(0.25));
        params.insert("c".into(), Value::Float(-3.0));
        params.insert("d".into(), Value::Float(f64::NAN));
        assert_eq!(canonical_query(&params).unwrap(), "a=1.0&b=0.25&c=-3.0&d=nan");
    }

    #[test]
    fn test_value_rendering() {
        let mut params = Params::new();
        params.insert("c".into(), Value::from(vec![1u8, 2]));
        params.insert("a".into(), Value::Nil);
        params.insert("b".into(), Value::from(true));
        assert_eq!(canonical_query(&params).unwrap(), "a=&b=True&c=AQI=");
        assert_eq!(
            compute_auth_code(&params, "k").unwrap(),
            "LroacAiUEshosL5LZUPUmF8l9UM="
        );
    }
}
