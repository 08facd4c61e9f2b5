// Wire format (MessagePack сериализация)
// Тело запроса и ответа: MessagePack map. Бинарный payload сжат gzip и лежит под ключом "payload".

use crate::error::{FgoError, Result};
use crate::protocol::envelope::{Params, ResponseEnvelope, ServerFailure, Value, RES_CODE_OK};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rmp_serde::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const PAYLOAD_KEY: &str = "payload";
pub const RES_CODE_KEY: &str = "resCode";
pub const FAIL_KEY: &str = "fail";

/// Упаковать произвольные данные в MessagePack (структуры как map)
pub fn pack_raw<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    data.serialize(&mut Serializer::new(&mut buffer).with_struct_map())?;
    Ok(buffer)
}

/// Распаковать MessagePack в произвольный тип
pub fn unpack_raw<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T> {
    let mut deserializer = Deserializer::new(data);
    Ok(T::deserialize(&mut deserializer)?)
}

pub fn compress_payload(data: &[u8]) -> Result<Vec<u8>> {
    let gzip_err = |e: std::io::Error| FgoError::Serialization(format!("gzip compress failed: {}", e));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(gzip_err)?;
    encoder.finish().map_err(gzip_err)
}

pub fn decompress_payload(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FgoError::Serialization(format!("gzip decompress failed: {}", e)))?;
    Ok(out)
}

/// Собрать тело запроса: параметры плюс сжатый payload
pub fn encode_body(params: &Params, payload: Option<&[u8]>) -> Result<Vec<u8>> {
    match payload {
        None => pack_raw(params),
        Some(raw) => {
            let mut params = params.clone();
            params.insert(PAYLOAD_KEY.to_string(), Value::Bin(compress_payload(raw)?));
            pack_raw(&params)
        }
    }
}

/// Разобрать тело как map параметров
pub fn decode_params(body: &[u8]) -> Result<Params> {
    match unpack_raw::<Value>(body)? {
        Value::Map(params) => Ok(params),
        other => Err(FgoError::ServerProtocol(format!(
            "response body is not a map: {:?}",
            other
        ))),
    }
}

/// Тело запроса на стороне сервера: параметры и распакованный payload
pub fn decode_body(body: &[u8]) -> Result<(Params, Option<Vec<u8>>)> {
    let mut params = decode_params(body)?;
    let payload = take_payload(&mut params)?;
    Ok((params, payload))
}

fn take_payload(params: &mut Params) -> Result<Option<Vec<u8>>> {
    match params.remove(PAYLOAD_KEY) {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::Bin(compressed)) => decompress_payload(&compressed).map(Some),
        Some(other) => Err(FgoError::ServerProtocol(format!(
            "payload must be binary, got {:?}",
            other
        ))),
    }
}

/// Код ответа: строка ("00") или число (0 -> "00")
pub fn res_code_of(params: &Params) -> Result<String> {
    match params.get(RES_CODE_KEY) {
        Some(Value::Str(code)) => Ok(code.clone()),
        Some(Value::Int(code)) => Ok(format!("{:02}", code)),
        Some(other) => Err(FgoError::ServerProtocol(format!(
            "resCode has unexpected type: {:?}",
            other
        ))),
        None => Err(FgoError::ServerProtocol("response without resCode".to_string())),
    }
}

/// Декодировать (уже расшифрованное) тело ответа
pub fn decode_response(status: u16, body: &[u8]) -> Result<ResponseEnvelope> {
    let mut params = decode_params(body)?;
    let res_code = res_code_of(&params)?;
    params.remove(RES_CODE_KEY);

    let fail = params.remove(FAIL_KEY);
    let server_error = if res_code == RES_CODE_OK {
        None
    } else {
        let detail = fail
            .as_ref()
            .and_then(Value::as_map)
            .and_then(|f| f.get("detail"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(ServerFailure {
            code: res_code.clone(),
            detail,
        })
    };

    let payload = take_payload(&mut params)?;

    Ok(ResponseEnvelope {
        status,
        res_code,
        params,
        payload,
        server_error,
    })
}

/// Тело ответа на стороне сервера (mock серверы и конформанс-тесты)
pub fn encode_response(res_code: &str, params: &Params, payload: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut params = params.clone();
    params.insert(RES_CODE_KEY.to_string(), Value::from(res_code));
    encode_body(&params, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_gzipped_binary() {
        let mut params = Params::new();
        params.insert("quest_id".into(), Value::from(94000502));
        let raw = vec![0x42u8; 512];

        let body = encode_body(&params, Some(&raw)).unwrap();
        let decoded = decode_params(&body).unwrap();
        let stored = decoded.get(PAYLOAD_KEY).and_then(Value::as_bytes).unwrap();
        assert!(stored.len() < raw.len());
        assert_eq!(&stored[..2], &[0x1f, 0x8b]);

        let (params_back, payload) = decode_body(&body).unwrap();
        assert_eq!(params_back, params);
        assert_eq!(payload.unwrap(), raw);
    }

    #[test]
    fn test_decode_response_success() {
        let mut params = Params::new();
        params.insert("deck_id".into(), Value::from(1));
        let body = encode_response("00", &params, Some(b"log")).unwrap();

        let response = decode_response(200, &body).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.res_code, "00");
        assert_eq!(response.params, params);
        assert_eq!(response.payload.as_deref(), Some(&b"log"[..]));
    }

    #[test]
    fn test_decode_response_failure_detail() {
        let mut fail = Params::new();
        fail.insert("detail".into(), Value::from("quest closed"));
        let mut params = Params::new();
        params.insert(FAIL_KEY.into(), Value::Map(fail));
        let body = encode_response("88", &params, None).unwrap();

        let response = decode_response(200, &body).unwrap();
        let failure = response.server_error.unwrap();
        assert_eq!(failure.code, "88");
        assert_eq!(failure.detail, "quest closed");
        assert!(response.params.is_empty());
    }

    #[test]
    fn test_numeric_res_code_and_missing_res_code() {
        let mut params = Params::new();
        params.insert(RES_CODE_KEY.into(), Value::from(0));
        assert_eq!(res_code_of(&params).unwrap(), "00");

        let body = pack_raw(&Params::new()).unwrap();
        assert!(matches!(decode_response(200, &body), Err(FgoError::ServerProtocol(_))));
        assert!(decode_params(&pack_raw(&vec![1, 2]).unwrap()).is_err());
    }
}
