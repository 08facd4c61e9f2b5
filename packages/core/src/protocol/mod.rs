// Протокол взаимодействия с игровым API
//
// envelope   - модель запроса/ответа
// wire       - MessagePack кодек и gzip payload
// transport  - доставка по HTTP
// validation - классификация ответов сервера
// battle     - battle хелперы

pub mod battle;
pub mod envelope;
pub mod transport;
pub mod validation;
pub mod wire;

pub use envelope::{Params, RequestBuilder, RequestEnvelope, ResponseEnvelope, ServerFailure, Value};
pub use transport::{HttpTransport, Transport, WireRequest, WireResponse};
