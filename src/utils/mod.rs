pub mod logger;
pub mod timer;
pub mod validator;
