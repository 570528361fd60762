//! Topic contract with the traceability domain service.
//!
//! Every operation is a request topic plus, where the service answers, a
//! result topic. The literal strings below are shared with the service and
//! must not change.

/// Root of every topic this client publishes or consumes.
pub const NAMESPACE: &str = "coreflux/factory01/traceability";

macro_rules! topic {
    ($suffix:literal) => {
        concat!("coreflux/factory01/traceability/", $suffix)
    };
}

/// A domain operation exposed over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    PartCreate,
    PartList,
    PartUpdateStatus,
    PartDelete,
    PartHistory,
    MovementRecord,
    MovementList,
    StationCreate,
    StationList,
    StationGet,
    StationActivity,
    StationParts,
    OperatorCreate,
    OperatorList,
    VerificationCheck,
    SystemStats,
}

impl Route {
    pub const ALL: [Route; 16] = [
        Route::PartCreate,
        Route::PartList,
        Route::PartUpdateStatus,
        Route::PartDelete,
        Route::PartHistory,
        Route::MovementRecord,
        Route::MovementList,
        Route::StationCreate,
        Route::StationList,
        Route::StationGet,
        Route::StationActivity,
        Route::StationParts,
        Route::OperatorCreate,
        Route::OperatorList,
        Route::VerificationCheck,
        Route::SystemStats,
    ];

    /// Topic the command is published on.
    pub const fn request_topic(self) -> &'static str {
        match self {
            Route::PartCreate => topic!("part/create"),
            Route::PartList => topic!("part/list"),
            Route::PartUpdateStatus => topic!("part/updatestatus"),
            Route::PartDelete => topic!("part/delete"),
            Route::PartHistory => topic!("part/history"),
            Route::MovementRecord => topic!("movement/record"),
            Route::MovementList => topic!("movement/list"),
            Route::StationCreate => topic!("station/create"),
            Route::StationList => topic!("station/list"),
            Route::StationGet => topic!("station/get"),
            Route::StationActivity => topic!("station/activity"),
            Route::StationParts => topic!("station/parts"),
            Route::OperatorCreate => topic!("operator/create"),
            Route::OperatorList => topic!("operator/list"),
            Route::VerificationCheck => topic!("verification/check"),
            Route::SystemStats => topic!("system/stats"),
        }
    }

    /// Topic the service answers on, if it answers at all.
    ///
    /// Station lookups answer on `station/info`, not `station/get/result`.
    pub const fn result_topic(self) -> Option<&'static str> {
        match self {
            Route::PartList => Some(topic!("part/list/result")),
            Route::PartHistory => Some(topic!("part/history/result")),
            Route::MovementList => Some(topic!("movement/list/result")),
            Route::StationList => Some(topic!("station/list/result")),
            Route::StationGet => Some(topic!("station/info")),
            Route::StationActivity => Some(topic!("station/activity/result")),
            Route::OperatorList => Some(topic!("operator/list/result")),
            Route::SystemStats => Some(topic!("system/stats/result")),
            _ => None,
        }
    }
}

/// Every result topic the session subscribes to at the broker on connect.
pub fn result_topics() -> Vec<&'static str> {
    Route::ALL.iter().filter_map(|r| r.result_topic()).collect()
}
