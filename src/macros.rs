macro_rules! invalid_data {
    ($e:expr) => {
        return Err(::std::io::Error::new(::std::io::ErrorKind::InvalidData, $e))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err(::std::io::Error::new(::std::io::ErrorKind::InvalidData, format!($fmt, $($arg)+)))
    };
}

macro_rules! malformed {
    ($e:expr) => {
        return Err($crate::error::Error::MalformedHeader(($e).to_string()))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err($crate::error::Error::MalformedHeader(format!($fmt, $($arg)+)))
    };
}
