mod outbound;
mod room_lifecycle;
