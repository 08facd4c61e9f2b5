// Модель запроса и ответа
//
// Запрос: эндпоинт, параметры, опциональный бинарный payload и признак protected.
// Протокольные поля (userId, authKey, версии, idempotencyKey, authCode)
// добавляет диспетчер, вызывающий их задать не может.

use crate::config::ClientSettings;
use crate::error::{FgoError, Result};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Параметры запроса/ответа; BTreeMap даёт стабильный порядок ключей для authCode
pub type Params = BTreeMap<String, Value>;

/// Протокольные поля, которые заполняются автоматически
pub const RESERVED_KEYS: &[&str] = &[
    "userId",
    "authKey",
    "appVer",
    "dateVer",
    "verCode",
    "dataVer",
    "lastAccessTime",
    "idempotencyKey",
    "authCode",
    "sessionToken",
    "payload",
];

/// Значение MessagePack
///
/// Строки и бинарные данные различаются явно, поэтому сериализация написана вручную.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Params),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Params> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Params> for Value {
    fn from(v: Params) -> Self {
        Value::Map(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bin(b) => serializer.serialize_bytes(b),
            Value::Array(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any MessagePack value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {} does not fit in i64", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Bin(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::Bin(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = Params::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// ============================================
// REQUEST
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct PlainRequest {
    endpoint: String,
    params: Params,
    idempotent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedRequest {
    endpoint: String,
    params: Params,
    payload: Option<Vec<u8>>,
}

/// Запрос до добавления протокольных полей
///
/// Protected запросы шифруются и никогда не повторяются автоматически.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEnvelope {
    Plain(PlainRequest),
    Protected(ProtectedRequest),
}

impl RequestEnvelope {
    pub fn builder(endpoint: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            endpoint: endpoint.into(),
            params: Params::new(),
            payload: None,
            idempotent: false,
            problems: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            RequestEnvelope::Plain(r) => &r.endpoint,
            RequestEnvelope::Protected(r) => &r.endpoint,
        }
    }

    pub fn params(&self) -> &Params {
        match self {
            RequestEnvelope::Plain(r) => &r.params,
            RequestEnvelope::Protected(r) => &r.params,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            RequestEnvelope::Plain(_) => None,
            RequestEnvelope::Protected(r) => r.payload.as_deref(),
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, RequestEnvelope::Protected(_))
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self, RequestEnvelope::Plain(PlainRequest { idempotent: true, .. }))
    }

    /// Служебный конструктор для login/refresh: без проверки зарезервированных ключей
    pub(crate) fn internal(endpoint: impl Into<String>, params: Params) -> Self {
        RequestEnvelope::Plain(PlainRequest {
            endpoint: endpoint.into(),
            params,
            idempotent: false,
        })
    }
}

#[derive(Debug)]
pub struct RequestBuilder {
    endpoint: String,
    params: Params,
    payload: Option<Vec<u8>>,
    idempotent: bool,
    problems: Vec<String>,
}

impl RequestBuilder {
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            self.problems.push(format!("parameter {:?} is reserved", key));
        } else if self.params.insert(key.clone(), value.into()).is_some() {
            self.problems.push(format!("parameter {:?} set twice", key));
        }
        self
    }

    /// Бинарный payload (battle actions). Допустим только для protected эндпоинтов.
    pub fn payload(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(bytes.into());
        self
    }

    /// Разрешить автоматический повтор при сетевой ошибке
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Собрать запрос; protected определяется по списку эндпоинтов в настройках
    pub fn build(self, settings: &ClientSettings) -> Result<RequestEnvelope> {
        if let Some(problem) = self.problems.into_iter().next() {
            return Err(FgoError::InvalidEnvelope(problem));
        }
        if !self.endpoint.starts_with('/') {
            return Err(FgoError::InvalidEnvelope(format!(
                "endpoint must start with '/': {:?}",
                self.endpoint
            )));
        }

        if settings.is_protected(&self.endpoint) {
            if self.idempotent {
                return Err(FgoError::InvalidEnvelope(format!(
                    "protected endpoint {} cannot be idempotent",
                    self.endpoint
                )));
            }
            Ok(RequestEnvelope::Protected(ProtectedRequest {
                endpoint: self.endpoint,
                params: self.params,
                payload: self.payload,
            }))
        } else {
            if self.payload.is_some() {
                return Err(FgoError::InvalidEnvelope(format!(
                    "binary payload requires a protected endpoint, got {}",
                    self.endpoint
                )));
            }
            Ok(RequestEnvelope::Plain(PlainRequest {
                endpoint: self.endpoint,
                params: self.params,
                idempotent: self.idempotent,
            }))
        }
    }
}

// ============================================
// RESPONSE
// ============================================

/// Код ответа при успехе
pub const RES_CODE_OK: &str = "00";

/// Игровая ошибка, присланная сервером в блоке `fail`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub code: String,
    pub detail: String,
}

/// Расшифрованный и декодированный ответ
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub res_code: String,
    pub params: Params,
    pub payload: Option<Vec<u8>>,
    pub server_error: Option<ServerFailure>,
}

impl ResponseEnvelope {
    pub fn is_ok(&self) -> bool {
        self.server_error.is_none()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Превратить игровую ошибку в `FgoError::ServerRejected`
    pub fn into_result(self) -> Result<Self> {
        match self.server_error {
            Some(ServerFailure { code, detail }) => Err(FgoError::ServerRejected { code, detail }),
            None => Ok(self),
        }
    }
}
