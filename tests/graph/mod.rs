pub mod _helpers;
