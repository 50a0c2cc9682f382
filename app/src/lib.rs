pub mod app;
pub mod board;

pub use app::DashboardApp;
pub use board::render_board;
