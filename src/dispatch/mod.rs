//! Push dispatch: the gateway contract, the FCM client and per-user fan-out.

pub mod delivery;
pub mod fcm;
pub mod gateway;
pub mod messages;

pub use delivery::{Delivery, DeliveryReport};
pub use fcm::{AccessTokenSource, FcmGateway, ServiceAccountTokens, StaticToken};
pub use gateway::{
    CHANNEL_TASK_REMINDERS, CHANNEL_WEATHER_ALERTS, DispatchError, DispatchErrorKind, MessageId,
    PushGateway, PushMessage,
};
