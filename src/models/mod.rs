pub mod user;
pub mod hall;
pub mod play;
pub mod performance;
pub mod reservation;

pub use user::User;
pub use hall::TheatreHall;
pub use play::{Actor, Genre, Play};
pub use performance::Performance;
pub use reservation::{Reservation, Ticket};
